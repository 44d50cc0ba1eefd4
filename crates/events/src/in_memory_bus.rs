//! In-memory invocation bus for tests/dev.

use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bus::{InvocationBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("bus lock poisoned")]
    Poisoned,
    /// Nobody is listening; the message would be lost.
    #[error("no live subscribers")]
    NoSubscribers,
}

/// In-memory fan-out bus.
///
/// Dead subscribers are pruned on publish. Publishing with no live
/// subscriber is an error so intake never reports success for an invocation
/// nobody will run.
#[derive(Debug)]
pub struct InMemoryInvocationBus<M> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<M>>>,
}

impl<M> InMemoryInvocationBus<M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M> Default for InMemoryInvocationBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> InvocationBus<M> for InMemoryInvocationBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        subs.retain(|tx| tx.send(message.clone()).is_ok());
        debug!(subscribers = subs.len(), "published invocation");

        if subs.is_empty() {
            return Err(InMemoryBusError::NoSubscribers);
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::unbounded_channel();

        // A poisoned lock still hands out a subscription; it just never
        // receives anything.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_published_messages() {
        let bus = InMemoryInvocationBus::<u32>::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(7).unwrap();

        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[test]
    fn publishing_without_subscribers_fails() {
        let bus = InMemoryInvocationBus::<u32>::new();
        assert!(matches!(bus.publish(1), Err(InMemoryBusError::NoSubscribers)));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InMemoryInvocationBus::<u32>::new();
        let live = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(1).unwrap();
        drop(live);
        assert!(matches!(bus.publish(2), Err(InMemoryBusError::NoSubscribers)));
    }
}
