//! Workflow invocation transport.
//!
//! Work is started by publishing a named event with a typed payload. Each
//! event name has exactly one workflow handler; correlation back to the
//! caller exists only through the job id carried in the payload.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod invocation;

pub use bus::{InvocationBus, Subscription};
pub use envelope::EventEnvelope;
pub use in_memory_bus::{InMemoryBusError, InMemoryInvocationBus};
pub use invocation::{InitiatePurchase, WorkflowEvent};
