//! Bulk purchase job persistence.
//!
//! ## Components
//!
//! - `JobStore`: create, load and move jobs through their status machine
//! - `InMemoryJobStore`: tests/dev
//! - `PostgresJobStore`: `bulk_purchase_job` table

pub mod postgres;
pub mod store;

pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
