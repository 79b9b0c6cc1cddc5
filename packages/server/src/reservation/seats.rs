//! Seat state machine: `available -> locked -> booked`, with
//! `locked -> available` on release or expiry.
//!
//! Each transition is a conditional row update. Multi-seat requests run in
//! one transaction and roll back unless every seat moved.

use std::collections::HashSet;

use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::*;
use tracing::{info, instrument};

use super::inventory;
use crate::entity::seat::{self, AVAILABLE, BOOKED, LOCKED};
use crate::error::AppError;

/// Most seats a single request may touch.
pub const MAX_SEATS_PER_REQUEST: usize = 20;

/// Labels `{prefix}{n}` for `n` in `start..=end`.
pub fn seat_labels(prefix: &str, start: i32, end: i32) -> Vec<String> {
    (start..=end).map(|n| format!("{prefix}{n}")).collect()
}

/// Trim, drop blanks and duplicates, keep the request order.
pub fn normalize_seat_ids(seats: &[String]) -> Result<Vec<String>, AppError> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = seats
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect();
    if ids.is_empty() {
        return Err(AppError::Validation("seats must not be empty".into()));
    }
    if ids.len() > MAX_SEATS_PER_REQUEST {
        return Err(AppError::Validation(format!(
            "Too many seats: max {MAX_SEATS_PER_REQUEST}"
        )));
    }
    Ok(ids)
}

/// Status as seen by readers: an expired lock reads as available.
pub fn effective_status(model: &seat::Model, now_ms: i64) -> &'static str {
    match model.status.as_str() {
        BOOKED => BOOKED,
        LOCKED if model.lock_expires_at.is_some_and(|t| t > now_ms) => LOCKED,
        _ => AVAILABLE,
    }
}

async fn seat_missing_or_conflict<C: ConnectionTrait>(
    db: &C,
    event_id: &str,
    seat_id: &str,
) -> AppError {
    match seat::Entity::find_by_id((event_id.to_string(), seat_id.to_string()))
        .one(db)
        .await
    {
        Ok(Some(_)) => AppError::SeatConflict(format!("Seat {seat_id} is not available")),
        Ok(None) => AppError::NotFound(format!("Seat {seat_id} not found")),
        Err(e) => e.into(),
    }
}

/// Lock `seat_ids` for `user_id` until now + `ttl_secs`.
///
/// A seat can be locked when it is available, when its lock has expired, or
/// when `user_id` already holds it (which extends the lock).
#[instrument(skip(db))]
pub async fn lock(
    db: &DatabaseConnection,
    event_id: &str,
    user_id: &str,
    seat_ids: &[String],
    ttl_secs: i64,
) -> Result<i64, AppError> {
    let now = Utc::now();
    let now_ms = now.timestamp_millis();
    let expires_at = now_ms + ttl_secs * 1000;

    let txn = db.begin().await?;
    for seat_id in seat_ids {
        let lockable = Condition::any()
            .add(seat::Column::Status.eq(AVAILABLE))
            .add(
                Condition::all()
                    .add(seat::Column::Status.eq(LOCKED))
                    .add(seat::Column::LockExpiresAt.lte(now_ms)),
            )
            .add(
                Condition::all()
                    .add(seat::Column::Status.eq(LOCKED))
                    .add(seat::Column::Holder.eq(user_id)),
            );

        let res = seat::Entity::update_many()
            .col_expr(seat::Column::Status, Expr::value(LOCKED))
            .col_expr(seat::Column::Holder, Expr::value(Some(user_id.to_string())))
            .col_expr(seat::Column::LockExpiresAt, Expr::value(Some(expires_at)))
            .col_expr(seat::Column::UpdatedAt, Expr::value(now))
            .filter(seat::Column::EventId.eq(event_id))
            .filter(seat::Column::SeatId.eq(seat_id.as_str()))
            .filter(lockable)
            .exec(&txn)
            .await?;

        if res.rows_affected == 0 {
            let err = seat_missing_or_conflict(&txn, event_id, seat_id).await;
            txn.rollback().await?;
            return Err(err);
        }
    }
    txn.commit().await?;

    info!(count = seat_ids.len(), "Seats locked");
    Ok(expires_at)
}

/// Release locks held by `user_id`. Seats it does not hold fail the request.
#[instrument(skip(db))]
pub async fn unlock(
    db: &DatabaseConnection,
    event_id: &str,
    user_id: &str,
    seat_ids: &[String],
) -> Result<(), AppError> {
    let now = Utc::now();
    let txn = db.begin().await?;
    for seat_id in seat_ids {
        let res = seat::Entity::update_many()
            .col_expr(seat::Column::Status, Expr::value(AVAILABLE))
            .col_expr(seat::Column::Holder, Expr::value(Option::<String>::None))
            .col_expr(seat::Column::LockExpiresAt, Expr::value(Option::<i64>::None))
            .col_expr(seat::Column::UpdatedAt, Expr::value(now))
            .filter(seat::Column::EventId.eq(event_id))
            .filter(seat::Column::SeatId.eq(seat_id.as_str()))
            .filter(seat::Column::Status.eq(LOCKED))
            .filter(seat::Column::Holder.eq(user_id))
            .exec(&txn)
            .await?;

        if res.rows_affected == 0 {
            let err = seat_missing_or_conflict(&txn, event_id, seat_id).await;
            txn.rollback().await?;
            return Err(err);
        }
    }
    txn.commit().await?;
    info!(count = seat_ids.len(), "Seats released");
    Ok(())
}

/// Book seats locked by `user_id` on `ticket_id` and take them out of the
/// ticket inventory, in one transaction.
#[instrument(skip(db))]
pub async fn confirm(
    db: &DatabaseConnection,
    event_id: &str,
    ticket_id: &str,
    user_id: &str,
    seat_ids: &[String],
) -> Result<(), AppError> {
    let now = Utc::now();
    let now_ms = now.timestamp_millis();
    let count = i32::try_from(seat_ids.len())
        .map_err(|_| AppError::Validation("Too many seats".into()))?;

    let txn = db.begin().await?;
    inventory::find_ticket(&txn, event_id, ticket_id).await?;

    for seat_id in seat_ids {
        let res = seat::Entity::update_many()
            .col_expr(seat::Column::Status, Expr::value(BOOKED))
            .col_expr(seat::Column::LockExpiresAt, Expr::value(Option::<i64>::None))
            .col_expr(seat::Column::UpdatedAt, Expr::value(now))
            .filter(seat::Column::EventId.eq(event_id))
            .filter(seat::Column::SeatId.eq(seat_id.as_str()))
            .filter(seat::Column::TicketId.eq(ticket_id))
            .filter(seat::Column::Status.eq(LOCKED))
            .filter(seat::Column::Holder.eq(user_id))
            .filter(seat::Column::LockExpiresAt.gt(now_ms))
            .exec(&txn)
            .await?;

        if res.rows_affected == 0 {
            let err = seat_missing_or_conflict(&txn, event_id, seat_id).await;
            txn.rollback().await?;
            return Err(err);
        }
    }

    if let Err(e) = inventory::reserve(&txn, event_id, ticket_id, count).await {
        txn.rollback().await?;
        return Err(e);
    }
    txn.commit().await?;

    info!(count, "Seats booked");
    Ok(())
}

/// Seats of an event, optionally of one ticket, ordered by label.
pub async fn list<C: ConnectionTrait>(
    db: &C,
    event_id: &str,
    ticket_id: Option<&str>,
) -> Result<Vec<seat::Model>, DbErr> {
    let mut select = seat::Entity::find().filter(seat::Column::EventId.eq(event_id));
    if let Some(ticket_id) = ticket_id {
        select = select.filter(seat::Column::TicketId.eq(ticket_id));
    }
    select
        .order_by_asc(seat::Column::TicketId)
        .order_by_asc(seat::Column::SeatId)
        .all(db)
        .await
}

/// Replace the seats of a ticket with labels for `start..=end`.
///
/// Refused while any seat of the ticket is booked or held by a live lock.
pub async fn regenerate<C: ConnectionTrait>(
    db: &C,
    event_id: &str,
    ticket_id: &str,
    prefix: &str,
    start: i32,
    end: i32,
) -> Result<Vec<String>, AppError> {
    let now = Utc::now();
    let now_ms = now.timestamp_millis();

    let busy = seat::Entity::find()
        .filter(seat::Column::EventId.eq(event_id))
        .filter(seat::Column::TicketId.eq(ticket_id))
        .filter(
            Condition::any().add(seat::Column::Status.eq(BOOKED)).add(
                Condition::all()
                    .add(seat::Column::Status.eq(LOCKED))
                    .add(seat::Column::LockExpiresAt.gt(now_ms)),
            ),
        )
        .count(db)
        .await?;
    if busy > 0 {
        return Err(AppError::Conflict(format!(
            "{busy} seats are booked or locked"
        )));
    }

    seat::Entity::delete_many()
        .filter(seat::Column::EventId.eq(event_id))
        .filter(seat::Column::TicketId.eq(ticket_id))
        .exec(db)
        .await?;

    let labels = seat_labels(prefix, start, end);
    insert_available(db, event_id, ticket_id, &labels).await?;
    Ok(labels)
}

/// Insert fresh available seats. A label already used in the event is a
/// `conflict`.
pub async fn insert_available<C: ConnectionTrait>(
    db: &C,
    event_id: &str,
    ticket_id: &str,
    labels: &[String],
) -> Result<(), AppError> {
    if labels.is_empty() {
        return Ok(());
    }
    let now = Utc::now();
    let rows = labels.iter().map(|label| seat::ActiveModel {
        event_id: Set(event_id.to_string()),
        seat_id: Set(label.clone()),
        ticket_id: Set(ticket_id.to_string()),
        status: Set(AVAILABLE.to_string()),
        holder: Set(None),
        lock_expires_at: Set(None),
        updated_at: Set(now),
    });

    match seat::Entity::insert_many(rows).exec_without_returning(db).await {
        Ok(_) => Ok(()),
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Err(
            AppError::Conflict("Seat labels overlap another ticket of this event".into()),
        ),
        Err(e) => Err(e.into()),
    }
}
