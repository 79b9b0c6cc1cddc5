use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chat")]
pub struct Model {
    /// UUIDv7 string.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Sorted participant ids joined with `:`.
    #[sea_orm(unique)]
    pub participant_key: String,

    pub last_text: Option<String>,
    pub last_sender: Option<String>,
    pub last_at: Option<DateTimeUtc>,

    #[sea_orm(has_many)]
    pub participants: HasMany<super::chat_participant::Entity>,

    #[sea_orm(has_many)]
    pub messages: HasMany<super::message::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
