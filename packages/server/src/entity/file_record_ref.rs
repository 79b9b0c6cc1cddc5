use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A post using a stored asset.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_record_ref")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub content_hash: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub post_id: String,

    #[sea_orm(belongs_to, from = "content_hash", to = "content_hash")]
    pub record: HasOne<super::file_record::Entity>,

    pub user_id: String,
    /// Primary media path the post points at.
    pub path: String,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
