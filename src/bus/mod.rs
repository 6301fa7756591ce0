//! Event Bus (C2): in-process fan-out of session and event messages.
//!
//! Built on `tokio::sync::broadcast`, which gives us the back-pressure policy
//! the contract asks for for free: publishers never block, and a subscriber
//! that falls behind the bounded buffer receives a `Lagged` marker on its next
//! read instead of stalling everyone else.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::models::{Event, Session};

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusMessage {
    SessionCreated { session: Session },
    SessionUpdated { session: Session },
    SessionDeleted { session_id: String },
    EventAppended { event: Event },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusMessage>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Subscribes to live messages. Callers wanting an initial snapshot should
    /// subscribe first, then read the snapshot from the Store, so that any
    /// message published during the snapshot read is queued rather than lost.
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    fn publish(&self, message: BusMessage) {
        // No subscribers is not an error: publishers must never block or fail
        // because nobody happens to be listening right now.
        let _ = self.sender.send(message);
    }

    pub fn session_created(&self, session: Session) {
        self.publish(BusMessage::SessionCreated { session });
    }

    pub fn session_updated(&self, session: Session) {
        self.publish(BusMessage::SessionUpdated { session });
    }

    pub fn session_deleted(&self, session_id: String) {
        self.publish(BusMessage::SessionDeleted { session_id });
    }

    pub fn event_appended(&self, event: Event) {
        self.publish(BusMessage::EventAppended { event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::SessionStatus;

    fn sample_session() -> Session {
        Session {
            session_id: "ses_1".into(),
            parent_session_id: None,
            agent_name: "echo".into(),
            status: SessionStatus::Pending,
            project_dir: None,
            created_at: crate::store::models::current_time(),
            modified_at: crate::store::models::current_time(),
            executor_identity: None,
            executor_profile: None,
            hostname: None,
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus = EventBus::new();
        bus.session_created(sample_session());
    }

    #[tokio::test]
    async fn subscriber_receives_messages_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.session_created(sample_session());
        bus.session_deleted("ses_1".into());

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, BusMessage::SessionCreated { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, BusMessage::SessionDeleted { .. }));
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lagged_marker_not_a_block() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        for _ in 0..(BUS_CAPACITY + 10) {
            bus.session_created(sample_session());
        }
        let result = rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
