use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "message")]
pub struct Model {
    /// UUIDv7 string; sorts by creation time.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub chat_id: String,

    #[sea_orm(belongs_to, from = "chat_id", to = "id")]
    pub chat: HasOne<super::chat::Entity>,

    pub sender_id: String,

    /// May be empty when the message carries attachments.
    pub content: String,

    /// JSON array of `{filename, path}`.
    pub files: String,

    /// JSON `{id, user, text}` snapshot of the replied-to message.
    pub reply_to: Option<String>,

    pub created_at: DateTimeUtc,
    pub edited_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
