use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};

use crate::entity::user_data;

/// Index row `(user, entity_type, entity_id) -> (item_type, item_id)`.
pub fn entry(
    user_id: &str,
    entity_type: &str,
    entity_id: &str,
    item_type: &str,
    item_id: &str,
) -> user_data::ActiveModel {
    user_data::ActiveModel {
        user_id: Set(user_id.to_string()),
        entity_type: Set(entity_type.to_string()),
        entity_id: Set(entity_id.to_string()),
        item_type: Set(item_type.to_string()),
        item_id: Set(item_id.to_string()),
        created_at: Set(Utc::now()),
    }
}

/// Insert index rows; rows that already exist are left untouched.
pub async fn insert_entries<C: ConnectionTrait>(
    db: &C,
    entries: Vec<user_data::ActiveModel>,
) -> Result<(), DbErr> {
    if entries.is_empty() {
        return Ok(());
    }
    let result = user_data::Entity::insert_many(entries)
        .on_conflict(
            OnConflict::columns([
                user_data::Column::UserId,
                user_data::Column::EntityType,
                user_data::Column::EntityId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await;

    match result {
        Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
        Err(e) => Err(e),
    }
}

pub async fn remove_entry<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    entity_type: &str,
    entity_id: &str,
) -> Result<u64, DbErr> {
    let res = user_data::Entity::delete_many()
        .filter(user_data::Column::UserId.eq(user_id))
        .filter(user_data::Column::EntityType.eq(entity_type))
        .filter(user_data::Column::EntityId.eq(entity_id))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}
