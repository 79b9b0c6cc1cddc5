use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One stored asset per content hash.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_record")]
pub struct Model {
    /// Hex SHA-256 of the uploaded bytes.
    #[sea_orm(primary_key, auto_increment = false)]
    pub content_hash: String,

    pub kind: String,
    /// Directory holding every generated variant.
    pub root_path: String,
    /// JSON asset manifest.
    pub manifest: String,
    pub size: i64,

    #[sea_orm(has_many)]
    pub refs: HasMany<super::file_record_ref::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
