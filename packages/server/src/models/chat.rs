use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::shared::Pagination;
use crate::entity::{chat, chat_participant};
use crate::hub::protocol::OutboundFrame;
use crate::hub::store::counterpart;

#[derive(Debug, Deserialize, ToSchema)]
pub struct DirectChatRequest {
    /// The other participant.
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatSummary {
    pub id: String,
    /// Sorted participant ids.
    pub participants: Vec<String>,
    /// Other member of a direct chat.
    pub counterpart: Option<String>,
    pub last_text: Option<String>,
    pub last_sender: Option<String>,
    pub last_at: Option<DateTime<Utc>>,
    /// Whether the caller has seen the latest message.
    pub read: bool,
    /// Whether the counterpart has seen the latest message.
    pub counterpart_read: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSummary {
    pub fn new(chat: chat::Model, members: &[chat_participant::Model], user_id: &str) -> Self {
        let other = counterpart(members, user_id).map(str::to_string);
        let read_of = |id: &str| members.iter().find(|m| m.user_id == id).map(|m| m.read);
        Self {
            participants: members.iter().map(|m| m.user_id.clone()).collect(),
            read: read_of(user_id).unwrap_or(true),
            counterpart_read: other.as_deref().and_then(read_of),
            counterpart: other,
            id: chat.id,
            last_text: chat.last_text,
            last_sender: chat.last_sender,
            last_at: chat.last_at,
            updated_at: chat.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DirectChatResponse {
    pub chat: ChatSummary,
    pub created: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    /// Newest first.
    pub messages: Vec<OutboundFrame>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PresenceResponse {
    pub room: String,
    /// Participants with at least one open session.
    pub online: Vec<String>,
}
