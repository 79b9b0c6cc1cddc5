use std::sync::Arc;

use common::event::{HASHTAG_TOPIC, HashtagEvent, topic};
use common::{EntityEvent, EventMethod, EventPublisher, GenericEvent};
use serde::Serialize;
use tracing::{debug, warn};

/// Fire-and-forget front of the event bus.
///
/// Publishing runs on a spawned task so callers never wait on the bus. With no
/// publisher configured every emit is a no-op.
#[derive(Clone, Default)]
pub struct EventEmitter {
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl EventEmitter {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher: Some(publisher),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Emit an entity change on `<entity>-created|edited|deleted`.
    pub fn entity(&self, entity: &str, event: EntityEvent) {
        let topic = topic(entity, event.method);
        self.emit(topic, &event);
    }

    /// Emit a feed post change keyed by its author.
    pub fn feed_post(&self, method: EventMethod, user_id: &str, post_id: &str) {
        let event = EntityEvent::new(
            "user",
            user_id,
            method,
            crate::entity::user_data::FEED_POST,
            post_id,
        );
        self.entity("post", event);
    }

    /// Emit a chat message change on the `chat-*` topics, keyed by room.
    pub fn chat_message(&self, method: EventMethod, room: &str, message_id: &str) {
        let event = EntityEvent::new("chat", room, method, "message", message_id);
        self.entity("chat", event);
    }

    pub fn hashtags(&self, post_id: &str, user_id: &str, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        let event = HashtagEvent {
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
            tags: tags.to_vec(),
        };
        self.emit(HASHTAG_TOPIC.to_string(), &event);
    }

    fn emit<T: Serialize>(&self, topic: String, payload: &T) {
        let Some(publisher) = self.publisher.clone() else {
            return;
        };
        let event = match GenericEvent::new(topic, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to encode event");
                return;
            }
        };
        tokio::spawn(async move {
            let topic = event.topic.clone();
            match publisher.publish(event).await {
                Ok(()) => debug!(topic, "Event published"),
                Err(e) => warn!(topic, error = %e, "Event publish failed"),
            }
        });
    }
}
