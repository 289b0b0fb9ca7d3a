//! Broadcast channel for patient events.
//!
//! The `EventBroadcaster` fans `BroadcastEvent`s out to every in-process
//! subscriber. Delivery is best-effort: slow receivers lag and lose events,
//! and a send with no subscribers is not an error.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::envelope::BroadcastEvent;

/// Default buffer size for the broadcast channel.
/// Events beyond this limit will cause older events to be dropped for slow receivers.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Broadcaster for patient events.
///
/// Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new broadcaster wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns 0 if there are no active subscribers.
    pub fn send(&self, event: BroadcastEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Subscribe to events.
    ///
    /// Events sent before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DomainEvent;
    use time::macros::{date, datetime};

    fn envelope() -> BroadcastEvent {
        let event = DomainEvent::created(
            1,
            "485 777 3456",
            "Sarah Johnson",
            date!(1985 - 03 - 15),
            "North Medical Centre",
            datetime!(2024-01-15 10:30:00 UTC),
        );
        BroadcastEvent::from_event(&event).unwrap()
    }

    #[test]
    fn test_broadcaster_creation() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert!(!broadcaster.has_subscribers());
    }

    #[test]
    fn test_broadcaster_no_subscribers() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.send(envelope()), 0);
    }

    #[tokio::test]
    async fn test_broadcaster_multiple_subscribers() {
        let broadcaster = EventBroadcaster::new();
        let mut receiver1 = broadcaster.subscribe();
        let mut receiver2 = broadcaster.subscribe();

        let sent = envelope();
        assert_eq!(broadcaster.send(sent.clone()), 2);

        assert_eq!(receiver1.recv().await.unwrap().id, sent.id);
        assert_eq!(receiver2.recv().await.unwrap().id, sent.id);
    }

    #[test]
    fn test_broadcaster_shared() {
        let broadcaster = EventBroadcaster::new_shared();
        let broadcaster2 = broadcaster.clone();

        let _receiver = broadcaster.subscribe();
        assert_eq!(broadcaster2.subscriber_count(), 1);
    }
}
