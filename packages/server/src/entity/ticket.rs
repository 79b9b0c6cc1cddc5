use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ticket")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub event_id: String,
    pub creator_id: String,

    pub name: String,
    pub price: f64,
    pub currency: String,
    pub color: String,

    /// Quantity as last declared by the creator.
    pub quantity: i32,
    /// `available + sold = total` at rest.
    pub available: i32,
    pub total: i32,
    pub sold: i32,

    pub seat_prefix: String,
    pub seat_start: Option<i32>,
    pub seat_end: Option<i32>,

    #[sea_orm(has_many)]
    pub seats: HasMany<super::seat::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
