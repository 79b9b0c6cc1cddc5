use sea_orm::sea_query::{
    Index, IndexCreateStatement, MysqlQueryBuilder, PostgresQueryBuilder, SqliteQueryBuilder,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr};
use tracing::{info, warn};

use crate::entity::{feed_post, file_record_ref, message, purchased_ticket, seat, user_data};

/// Ensure composite lookup indexes exist.
///
/// Schema sync only creates single-column indexes, so the composite ones the
/// hot queries rely on are created here on startup.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    let indexes = [
        // History: WHERE chat_id = ? ORDER BY created_at DESC
        (
            "idx_message_chat_created",
            Index::create()
                .if_not_exists()
                .name("idx_message_chat_created")
                .table(message::Entity)
                .col(message::Column::ChatId)
                .col(message::Column::CreatedAt)
                .to_owned(),
        ),
        // Seat map and seat regeneration per ticket
        (
            "idx_seat_event_ticket",
            Index::create()
                .if_not_exists()
                .name("idx_seat_event_ticket")
                .table(seat::Entity)
                .col(seat::Column::EventId)
                .col(seat::Column::TicketId)
                .to_owned(),
        ),
        (
            "idx_purchased_ticket_event_ticket",
            Index::create()
                .if_not_exists()
                .name("idx_purchased_ticket_event_ticket")
                .table(purchased_ticket::Entity)
                .col(purchased_ticket::Column::EventId)
                .col(purchased_ticket::Column::TicketId)
                .to_owned(),
        ),
        // Release on post delete: WHERE post_id = ?
        (
            "idx_file_record_ref_post",
            Index::create()
                .if_not_exists()
                .name("idx_file_record_ref_post")
                .table(file_record_ref::Entity)
                .col(file_record_ref::Column::PostId)
                .to_owned(),
        ),
        (
            "idx_feed_post_user_timestamp",
            Index::create()
                .if_not_exists()
                .name("idx_feed_post_user_timestamp")
                .table(feed_post::Entity)
                .col(feed_post::Column::UserId)
                .col(feed_post::Column::Timestamp)
                .to_owned(),
        ),
        (
            "idx_user_data_user_item",
            Index::create()
                .if_not_exists()
                .name("idx_user_data_user_item")
                .table(user_data::Entity)
                .col(user_data::Column::UserId)
                .col(user_data::Column::ItemType)
                .to_owned(),
        ),
    ];

    let backend = db.get_database_backend();
    for (name, index) in indexes {
        let stmt = build(&index, backend);
        match db.execute_unprepared(&stmt).await {
            Ok(_) => info!("Ensured index {} exists", name),
            Err(e) => warn!("Failed to create index {}: {}", name, e),
        }
    }

    Ok(())
}

fn build(index: &IndexCreateStatement, backend: DatabaseBackend) -> String {
    match backend {
        DatabaseBackend::Postgres => index.to_string(PostgresQueryBuilder),
        DatabaseBackend::Sqlite => index.to_string(SqliteQueryBuilder),
        _ => index.to_string(MysqlQueryBuilder),
    }
}
