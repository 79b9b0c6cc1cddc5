use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "feed_post")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub user_id: String,
    /// Denormalized author name.
    pub username: String,

    /// `text`, `image`, `video`, `audio`, `blog` or `merchandise`.
    pub post_type: String,
    pub text: String,
    pub title: String,
    pub description: String,

    // JSON encoded columns.
    pub tags: String,
    pub media: String,
    pub media_urls: String,
    pub resolutions: String,
    pub subtitles: String,

    pub thumbnail: Option<String>,

    pub created_at: DateTimeUtc,
    /// Unix seconds, kept for feed ordering.
    pub timestamp: i64,
    pub likes: i64,
}

impl ActiveModelBehavior for ActiveModel {}
