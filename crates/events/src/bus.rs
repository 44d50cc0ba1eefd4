//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the **transport** between job intake and the workflow worker.
//!
//! ## Delivery
//!
//! - **At-least-once**: an invocation may arrive more than once. Handlers are
//!   idempotent because every side effect runs behind a step checkpoint and
//!   terminal jobs are skipped.
//! - **No persistence**: the job row is the source of truth. An invocation
//!   lost with the process can be re-published for any non-terminal job.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// A subscription to published messages.
///
/// Intended for a single consumer task.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Take a message if one is ready.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Pub/sub transport for workflow invocations.
///
/// `publish()` can fail (e.g. the bus is closed); callers surface that to
/// the requester since the job row already exists and can be re-published.
pub trait InvocationBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> InvocationBus<M> for Arc<B>
where
    B: InvocationBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
