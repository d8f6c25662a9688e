//! Event bus for mentorboard using tokio::broadcast
//!
//! Provides a publish-subscribe mechanism for refresh activity.

use mentorboard_types::{RefreshReason, SubjectKey, TickSummary};
use tokio::sync::broadcast;

/// Events emitted by the cache layer
#[derive(Debug, Clone)]
pub enum DataEvent {
    /// A subject was marked stale
    Enqueued {
        key: SubjectKey,
        reason: RefreshReason,
    },
    /// A cache row was replaced
    RecordRefreshed(SubjectKey),
    /// A refresh attempt failed; the previous row is untouched
    RefreshFailed {
        key: SubjectKey,
        kind: &'static str,
        message: String,
    },
    /// Subject deleted; its row and queue entry are gone
    SubjectPurged(SubjectKey),
    /// Scheduler tick finished
    TickCompleted(Box<TickSummary>),
}

impl DataEvent {
    /// Name used for SSE event types and debounce keys
    pub fn name(&self) -> &'static str {
        match self {
            DataEvent::Enqueued { .. } => "enqueued",
            DataEvent::RecordRefreshed(_) => "record_refreshed",
            DataEvent::RefreshFailed { .. } => "refresh_failed",
            DataEvent::SubjectPurged(_) => "subject_purged",
            DataEvent::TickCompleted(_) => "tick_completed",
        }
    }
}

/// Event bus for broadcasting data events
///
/// Uses tokio::broadcast for multi-consumer support.
/// The web crate subscribes for SSE push.
pub struct EventBus {
    sender: broadcast::Sender<DataEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: DataEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.sender.subscribe()
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::default_capacity();
        let mut rx = bus.subscribe();

        bus.publish(DataEvent::RecordRefreshed(SubjectKey::student("s1")));
        bus.publish(DataEvent::Enqueued {
            key: SubjectKey::director("d1"),
            reason: RefreshReason::CohortChanged,
        });

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, DataEvent::RecordRefreshed(key) if key.subject_id == "s1"));

        let event2 = rx.recv().await.unwrap();
        assert_eq!(event2.name(), "enqueued");
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::default_capacity();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(DataEvent::SubjectPurged(SubjectKey::sponsor("org1")));

        assert!(matches!(rx1.recv().await.unwrap(), DataEvent::SubjectPurged(_)));
        assert!(matches!(rx2.recv().await.unwrap(), DataEvent::SubjectPurged(_)));
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::default_capacity();
        bus.publish(DataEvent::TickCompleted(Box::default()));
    }
}
