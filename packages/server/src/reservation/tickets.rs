//! Ticket classes of an event: creation with seats, creator-only edits and
//! deletion, cached listing.

use chrono::Utc;
use sea_orm::*;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{inventory, seats};
use crate::cache::{Cache, ticket_list_key};
use crate::entity::{seat, ticket};
use crate::error::AppError;
use crate::models::ticket::{TicketDraft, TicketPatch, TicketResponse};

fn require_creator(ticket: &ticket::Model, user_id: &str) -> Result<(), AppError> {
    if ticket.creator_id != user_id {
        return Err(AppError::Forbidden(
            "Only the ticket creator can change it".into(),
        ));
    }
    Ok(())
}

/// Insert a ticket and, when a seat range is given, its available seats.
#[instrument(skip(db, draft), fields(name = %draft.name))]
pub async fn create(
    db: &DatabaseConnection,
    event_id: &str,
    creator_id: &str,
    draft: TicketDraft,
) -> Result<ticket::Model, AppError> {
    let now = Utc::now();
    let id = Uuid::now_v7().to_string();
    let (seat_start, seat_end) = draft.seat_range.unzip();

    let txn = db.begin().await?;
    let model = ticket::ActiveModel {
        id: Set(id.clone()),
        event_id: Set(event_id.to_string()),
        creator_id: Set(creator_id.to_string()),
        name: Set(draft.name),
        price: Set(draft.price),
        currency: Set(draft.currency),
        color: Set(draft.color),
        quantity: Set(draft.quantity),
        available: Set(draft.quantity),
        total: Set(draft.quantity),
        sold: Set(0),
        seat_prefix: Set(draft.seat_prefix.clone()),
        seat_start: Set(seat_start),
        seat_end: Set(seat_end),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;

    if let Some((start, end)) = draft.seat_range {
        let labels = seats::seat_labels(&draft.seat_prefix, start, end);
        if let Err(e) = seats::insert_available(&txn, event_id, &id, &labels).await {
            txn.rollback().await?;
            return Err(e);
        }
    }
    txn.commit().await?;

    info!(ticket_id = %model.id, "Ticket created");
    Ok(model)
}

/// Apply `patch` to a ticket owned by `user_id`.
///
/// A quantity change goes through [`inventory::set_quantity`]. A new seat
/// range is stored but existing seats are not renumbered.
#[instrument(skip(db, patch))]
pub async fn edit(
    db: &DatabaseConnection,
    event_id: &str,
    ticket_id: &str,
    user_id: &str,
    patch: TicketPatch,
) -> Result<ticket::Model, AppError> {
    let current = inventory::find_ticket(db, event_id, ticket_id).await?;
    require_creator(&current, user_id)?;
    if patch.is_empty() {
        return Ok(current);
    }

    let txn = db.begin().await?;
    if let Some(quantity) = patch.quantity.filter(|q| *q != current.quantity) {
        if let Err(e) = inventory::set_quantity(&txn, &current, quantity).await {
            txn.rollback().await?;
            return Err(e);
        }
    }

    let mut active: ticket::ActiveModel = current.into();
    if let Some(name) = patch.name {
        active.name = Set(name);
    }
    if let Some(price) = patch.price {
        active.price = Set(price);
    }
    if let Some(currency) = patch.currency {
        active.currency = Set(currency);
    }
    if let Some(color) = patch.color {
        active.color = Set(color);
    }
    if let Some(prefix) = patch.seat_prefix {
        active.seat_prefix = Set(prefix);
    }
    if let Some((start, end)) = patch.seat_range {
        active.seat_start = Set(Some(start));
        active.seat_end = Set(Some(end));
    }
    active.updated_at = Set(Utc::now());
    active.update(&txn).await?;
    txn.commit().await?;

    inventory::find_ticket(db, event_id, ticket_id).await
}

/// Delete an unsold ticket and its seats.
#[instrument(skip(db))]
pub async fn delete(
    db: &DatabaseConnection,
    event_id: &str,
    ticket_id: &str,
    user_id: &str,
) -> Result<(), AppError> {
    let current = inventory::find_ticket(db, event_id, ticket_id).await?;
    require_creator(&current, user_id)?;
    if current.sold > 0 {
        return Err(AppError::Conflict(format!(
            "{} tickets were already sold",
            current.sold
        )));
    }

    let txn = db.begin().await?;
    let res = ticket::Entity::delete_many()
        .filter(ticket::Column::Id.eq(ticket_id))
        .filter(ticket::Column::EventId.eq(event_id))
        .filter(ticket::Column::Sold.eq(0))
        .exec(&txn)
        .await?;
    if res.rows_affected == 0 {
        txn.rollback().await?;
        return Err(AppError::Conflict("Ticket was sold concurrently".into()));
    }
    seat::Entity::delete_many()
        .filter(seat::Column::EventId.eq(event_id))
        .filter(seat::Column::TicketId.eq(ticket_id))
        .exec(&txn)
        .await?;
    txn.commit().await?;

    info!("Ticket deleted");
    Ok(())
}

/// Tickets of an event, oldest first. Served from the cache when warm.
pub async fn list(
    db: &DatabaseConnection,
    cache: &Cache,
    event_id: &str,
) -> Result<Vec<TicketResponse>, AppError> {
    let key = ticket_list_key(event_id);
    if let Some(cached) = cache.get_json::<Vec<TicketResponse>>(&key) {
        return Ok(cached);
    }

    let tickets: Vec<TicketResponse> = ticket::Entity::find()
        .filter(ticket::Column::EventId.eq(event_id))
        .order_by_asc(ticket::Column::CreatedAt)
        .order_by_asc(ticket::Column::Id)
        .all(db)
        .await?
        .into_iter()
        .map(TicketResponse::from)
        .collect();

    cache.set_json(key, &tickets);
    Ok(tickets)
}

/// Rebuild the seats of a ticket from its stored range.
#[instrument(skip(db))]
pub async fn regenerate_seats(
    db: &DatabaseConnection,
    event_id: &str,
    ticket_id: &str,
    user_id: &str,
) -> Result<Vec<String>, AppError> {
    let current = inventory::find_ticket(db, event_id, ticket_id).await?;
    require_creator(&current, user_id)?;
    let (Some(start), Some(end)) = (current.seat_start, current.seat_end) else {
        return Err(AppError::Validation("Ticket has no seat range".into()));
    };

    let txn = db.begin().await?;
    match seats::regenerate(&txn, event_id, ticket_id, &current.seat_prefix, start, end).await {
        Ok(labels) => {
            txn.commit().await?;
            info!(count = labels.len(), "Seats regenerated");
            Ok(labels)
        }
        Err(e) => {
            txn.rollback().await?;
            Err(e)
        }
    }
}
