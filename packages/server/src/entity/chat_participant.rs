use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chat_participant")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub chat_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,

    #[sea_orm(belongs_to, from = "chat_id", to = "id")]
    pub chat: HasOne<super::chat::Entity>,

    /// Whether this participant has seen the latest message.
    pub read: bool,
}

impl ActiveModelBehavior for ActiveModel {}
