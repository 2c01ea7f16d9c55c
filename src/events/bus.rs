//! Event bus for broadcasting transaction events to observers

use super::{EventSink, TransactionEvent};
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Event bus that distributes TransactionEvents via `tokio::sync::broadcast`
///
/// Fire-and-forget: publishing never blocks, never panics.
/// If no subscribers are connected, events are silently dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TransactionEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive events (metrics collectors, health endpoints)
    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: TransactionEvent) {
        let kind = event.kind();
        if let Ok(n) = self.sender.send(event) {
            debug!(event = kind, subscribers = n, "TransactionEvent published");
        }
        // Err means no subscribers, which is fine
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
