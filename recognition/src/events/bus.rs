//! Broadcast bus for lesson presentation events.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::LessonEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to LessonEventBus
pub type SharedLessonEventBus = Arc<LessonEventBus>;

#[derive(Debug)]
pub struct LessonEventBus {
    sender: broadcast::Sender<LessonEvent>,
}

impl LessonEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedLessonEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers. Having none is not an error.
    pub fn publish(&self, event: LessonEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LessonEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LessonEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn badge(name: &str) -> LessonEvent {
        LessonEvent::BadgeAwarded {
            badge: name.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = LessonEventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(badge("alphabet_first"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "badge_awarded");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = LessonEventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(badge("numbers_complete"));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event_type(), e2.event_type());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = LessonEventBus::default();
        bus.publish(badge("nobody_listening"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
