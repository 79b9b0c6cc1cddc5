use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const AVAILABLE: &str = "available";
pub const LOCKED: &str = "locked";
pub const BOOKED: &str = "booked";

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "seat")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub event_id: String,
    /// Label such as `A5`, unique within the event.
    #[sea_orm(primary_key, auto_increment = false)]
    pub seat_id: String,

    pub ticket_id: String,

    #[sea_orm(belongs_to, from = "ticket_id", to = "id")]
    pub ticket: HasOne<super::ticket::Entity>,

    /// One of `available`, `locked`, `booked`.
    pub status: String,
    pub holder: Option<String>,
    /// Unix milliseconds after which a lock no longer holds.
    pub lock_expires_at: Option<i64>,

    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
