//! Server-wide change event bus.

use multikv_protocol::ChangeEvent;
use tokio::sync::broadcast;

/// Default bus capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Carries every successful mutation to every connection.
///
/// Each connection holds one receiver and feeds what it gets through its own
/// [`SubscriptionRegistry`](crate::subscription::SubscriptionRegistry).
///
/// A connection that falls more than `capacity` events behind skips the
/// oldest ones. Its subscribers get no push for those events and no signal
/// that they were lost; the connection only logs a warning. Size the
/// capacity for the largest burst of writes a slow reader must absorb.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Creates a bus holding at most `capacity` undelivered events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a mutation. Returns the number of connections that will see it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        // Ignore send errors (no receivers)
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a receiver that sees every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
