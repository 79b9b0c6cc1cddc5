//! Chat frames exchanged over `/ws/{room}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::message;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Chat,
    Edit,
    Delete,
}

/// Client to server.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub action: Action,
    /// Target message for `edit` and `delete`.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Message being replied to, `chat` only.
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Attachment {
    /// Name as uploaded.
    pub filename: String,
    /// Path under the static root, e.g. `uploads/chat/photo/<id>.png`.
    pub path: String,
}

/// Snapshot of the message a reply points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ReplyRef {
    pub id: String,
    pub user: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FrameAction {
    Chat,
    Edit,
    Delete,
    /// Replayed on connect, oldest first.
    History,
}

impl From<Action> for FrameAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Chat => FrameAction::Chat,
            Action::Edit => FrameAction::Edit,
            Action::Delete => FrameAction::Delete,
        }
    }
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct OutboundFrame {
    pub action: FrameAction,
    pub id: String,
    pub room: String,
    pub sender_id: String,
    pub content: String,
    pub files: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyRef>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl OutboundFrame {
    pub fn from_message(action: FrameAction, model: &message::Model) -> Self {
        Self {
            action,
            id: model.id.clone(),
            room: model.chat_id.clone(),
            sender_id: model.sender_id.clone(),
            content: model.content.clone(),
            files: decode_files(&model.files),
            reply_to: model
                .reply_to
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            timestamp: model.created_at,
            edited_at: model.edited_at,
        }
    }

    pub fn to_text(&self) -> Result<String, AppError> {
        serde_json::to_string(self).map_err(|e| AppError::Internal(format!("encode frame: {e}")))
    }
}

/// Error reported to the originating session only.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrame {
    pub action: &'static str,
    pub error: &'static str,
    pub message: String,
}

impl From<&AppError> for ErrorFrame {
    fn from(err: &AppError) -> Self {
        Self {
            action: "error",
            error: err.kind(),
            message: err.public_message(),
        }
    }
}

pub fn encode_files(files: &[Attachment]) -> String {
    serde_json::to_string(files).unwrap_or_else(|_| "[]".to_string())
}

fn decode_files(raw: &str) -> Vec<Attachment> {
    serde_json::from_str(raw).unwrap_or_default()
}
