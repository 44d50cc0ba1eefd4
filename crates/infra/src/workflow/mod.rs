//! Bulk purchase workflow.
//!
//! ## Components
//!
//! - `Orchestrator`: drives a job through inventory, logins, payment links,
//!   purchases and redemptions
//! - `JobIntake`: validates a request, creates the job, publishes the invocation
//! - `InvocationWorker`: consumes invocations and runs the orchestrator
//! - `WorkflowError`: failure taxonomy and its retry classes

pub mod error;
pub mod intake;
mod login;
pub mod orchestrator;
pub mod stage;
pub mod steps;
pub mod worker;

pub use error::WorkflowError;
pub use intake::{IntakeError, JobIntake};
pub use orchestrator::{Orchestrator, PurchaseReport, RunOutcome, UnitReport, WorkflowDeps};
pub use stage::WorkflowStage;
pub use worker::{InvocationWorker, WorkerHandle};
