//! `voucherflow-core`: domain building blocks shared by every layer.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, validated request values, portal
//! vocabulary and the persisted `Job` record with its status machine.

pub mod contract;
pub mod error;
pub mod id;
pub mod job;
pub mod portal;
pub mod value_object;

pub use contract::{Contract, ContractViolation};
pub use error::{DomainError, DomainResult};
pub use id::{JobId, UserId};
pub use job::{Job, JobStatus, Transition};
pub use portal::{OtpPurpose, Portal};
pub use value_object::{Amount, Quantity};
