//! Infrastructure layer: durable steps, stores, portals and the purchase workflow.
//!
//! - `steps`: checkpointed step execution with retries and concurrency limits
//! - `jobs`: job persistence
//! - `otp`: inbound SMS storage, classification and the OTP waiter
//! - `portals`: external portal traits and sandbox implementations
//! - `workflow`: intake, orchestrator and invocation worker
//! - `config`: orchestrator configuration

pub mod config;
pub mod jobs;
pub mod otp;
pub mod portals;
pub mod steps;
pub mod workflow;
