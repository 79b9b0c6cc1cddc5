use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchased_ticket")]
pub struct Model {
    /// Random URL-safe code; what the QR payload carries.
    #[sea_orm(primary_key, auto_increment = false)]
    pub unique_code: String,

    #[sea_orm(indexed)]
    pub event_id: String,
    pub ticket_id: String,
    pub buyer_id: String,
    pub buyer_name: String,
    pub seat_id: Option<String>,

    pub purchased_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
