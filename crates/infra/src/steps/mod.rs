//! Durable step execution.
//!
//! ## Design
//!
//! - A job is a sequence of named steps; each step's output is checkpointed
//! - Re-invoking a job replays committed steps instead of re-running them
//! - Steps declare concurrency limits scoped to the job, a portal or a key
//! - Failed attempts are retried per the step's policy and the error's class
//!
//! ## Components
//!
//! - `StepSpec`: name, kind, retry policy and concurrency limits of a step
//! - `CheckpointStore`: persistence of step progress (in-memory or Postgres)
//! - `ConcurrencyGate`: keyed FIFO semaphores
//! - `StepExecutor`: runs a step body through the gate and the checkpoint store

pub mod checkpoint;
pub mod executor;
pub mod gate;
pub mod postgres;
pub mod types;

pub use checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore};
pub use executor::{ExecutorError, StepExecutor};
pub use gate::{ConcurrencyGate, GateError, GatePermit};
pub use postgres::PostgresCheckpointStore;
pub use types::{
    BackoffStrategy, Checkpoint, CheckpointState, ConcurrencyLimit, ConcurrencyScope, RetryClass,
    RetryDecision, RetryPolicy, StepSpec,
};
