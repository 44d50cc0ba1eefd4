//! Voucher domain module.
//!
//! This crate turns a target amount and a snapshot of marketplace inventory
//! into a purchase plan. It is deterministic domain logic only (no IO, no HTTP,
//! no storage), so a plan can be recomputed on retry without bookkeeping.

pub mod allocator;
pub mod denomination;
pub mod plan;

pub use allocator::{AllocationError, allocate, allocate_units, candidates};
pub use denomination::{Inventory, InventoryLine, VoucherDenomination};
pub use plan::{PlanLine, PurchasePlan};
