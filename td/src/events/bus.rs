//! Event sink seam and the in-process broadcast bus

use tokio::sync::broadcast;
use tracing::debug;

use super::types::TaskEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Where task outcomes are published
///
/// Publishing is fire-and-forget; a sink must never block the caller.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: TaskEvent);
}

/// Broadcast bus; every subscriber sees every event published after it subscribed
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: TaskEvent) {
        debug!(event_type = event.event_type(), task_id = event.task_id(), "EventBus::publish");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}
