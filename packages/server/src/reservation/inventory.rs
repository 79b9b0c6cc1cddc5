//! Ticket inventory. Every decrement is one conditional update guarded by
//! `available >= requested`; nothing reads and then writes.

use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::*;
use tracing::{debug, instrument};

use crate::entity::ticket;
use crate::error::AppError;

/// Move `quantity` units from available to sold.
///
/// Fails with `insufficient_inventory` when fewer remain and `not_found`
/// when the ticket does not belong to `event_id`.
#[instrument(skip(db))]
pub async fn reserve<C: ConnectionTrait>(
    db: &C,
    event_id: &str,
    ticket_id: &str,
    quantity: i32,
) -> Result<(), AppError> {
    if quantity <= 0 {
        return Err(AppError::Validation("Quantity must be positive".into()));
    }

    let res = ticket::Entity::update_many()
        .col_expr(
            ticket::Column::Available,
            Expr::col(ticket::Column::Available).sub(quantity),
        )
        .col_expr(ticket::Column::Sold, Expr::col(ticket::Column::Sold).add(quantity))
        .col_expr(ticket::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(ticket::Column::Id.eq(ticket_id))
        .filter(ticket::Column::EventId.eq(event_id))
        .filter(ticket::Column::Available.gte(quantity))
        .exec(db)
        .await?;

    if res.rows_affected > 0 {
        debug!("Inventory reserved");
        return Ok(());
    }

    match find_ticket(db, event_id, ticket_id).await {
        Ok(t) => Err(AppError::InsufficientInventory(format!(
            "Only {} tickets left",
            t.available
        ))),
        Err(e) => Err(e),
    }
}

pub async fn find_ticket<C: ConnectionTrait>(
    db: &C,
    event_id: &str,
    ticket_id: &str,
) -> Result<ticket::Model, AppError> {
    ticket::Entity::find_by_id(ticket_id)
        .filter(ticket::Column::EventId.eq(event_id))
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {ticket_id} not found")))
}

/// Set the declared quantity to `new_quantity`.
///
/// `total` follows the quantity and `available` becomes `total - sold`, so
/// the inventory invariant holds and `sold` is untouched. The write is
/// conditional on `sold` still being what was read; a concurrent sale makes
/// it fail with `conflict`.
#[instrument(skip(db, current), fields(ticket_id = %current.id))]
pub async fn set_quantity<C: ConnectionTrait>(
    db: &C,
    current: &ticket::Model,
    new_quantity: i32,
) -> Result<(), AppError> {
    if new_quantity < current.sold {
        return Err(AppError::Validation(format!(
            "Quantity cannot drop below the {} tickets already sold",
            current.sold
        )));
    }

    let res = ticket::Entity::update_many()
        .col_expr(ticket::Column::Quantity, Expr::value(new_quantity))
        .col_expr(ticket::Column::Total, Expr::value(new_quantity))
        .col_expr(
            ticket::Column::Available,
            Expr::value(new_quantity - current.sold),
        )
        .col_expr(ticket::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(ticket::Column::Id.eq(current.id.as_str()))
        .filter(ticket::Column::Sold.eq(current.sold))
        .exec(db)
        .await?;

    if res.rows_affected == 0 {
        return Err(AppError::Conflict(
            "Ticket sold concurrently, retry the edit".into(),
        ));
    }
    Ok(())
}
