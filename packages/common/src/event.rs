use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic that receives sanitized hashtags of new feed posts.
pub const HASHTAG_TOPIC: &str = "hashtags";

/// Mutation kind carried on the bus, mirroring HTTP verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventMethod {
    Post,
    Put,
    Delete,
}

impl EventMethod {
    /// Topic suffix for this method: `created`, `edited` or `deleted`.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Post => "created",
            Self::Put => "edited",
            Self::Delete => "deleted",
        }
    }
}

/// Entity change notification consumed by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub entity_type: String,
    pub entity_id: String,
    pub method: EventMethod,
    pub item_type: String,
    pub item_id: String,
}

impl EntityEvent {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        method: EventMethod,
        item_type: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            method,
            item_type: item_type.into(),
            item_id: item_id.into(),
        }
    }
}

/// Hashtags extracted from a post, published on [`HASHTAG_TOPIC`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashtagEvent {
    pub post_id: String,
    pub user_id: String,
    pub tags: Vec<String>,
}

/// Topic name for an entity mutation, e.g. `post-created`.
pub fn topic(entity: &str, method: EventMethod) -> String {
    format!("{entity}-{}", method.verb())
}

/// Topic plus JSON payload, the unit handed to a publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl GenericEvent {
    pub fn new<T: Serialize>(topic: impl Into<String>, payload: &T) -> Result<Self, PublishError> {
        Ok(Self {
            topic: topic.into(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("event bus error: {0}")]
    Transport(String),
}

/// Append-only sink for entity events. Delivery is at-most-once.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: GenericEvent) -> Result<(), PublishError>;
}
