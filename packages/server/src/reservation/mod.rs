//! Reservation engine: inventory, seat locks, issuance and signed QR
//! payloads.

pub mod inventory;
pub mod issuance;
pub mod qr;
pub mod seats;
pub mod tickets;

use chrono::Utc;
use sea_orm::*;
use tracing::{error, instrument};

use crate::cache::ticket_list_key;
use crate::entity::purchased_ticket;
use crate::error::AppError;
use crate::models::ticket::{IssuedTicket, VerifyQuery};
use crate::state::AppState;
use issuance::IssueRequest;

/// Buy `quantity` unseated entries.
///
/// The decrement commits before issuance. An issuance failure is reported
/// as `persistence_failed` with `partial_success` and is not reversed.
#[instrument(skip(state, req), fields(ticket_id = req.ticket_id))]
pub async fn purchase(
    state: &AppState,
    req: &IssueRequest<'_>,
    quantity: i32,
) -> Result<Vec<IssuedTicket>, AppError> {
    let max = state.config.ticket.max_per_order;
    if !(1..=max).contains(&quantity) {
        return Err(AppError::Validation(format!(
            "quantity must be between 1 and {max}"
        )));
    }

    inventory::reserve(&state.db, req.event_id, req.ticket_id, quantity).await?;
    state.cache.invalidate(&ticket_list_key(req.event_id));

    let seats = vec![None; usize::try_from(quantity).unwrap_or_default()];
    issue_signed(state, req, &seats).await
}

/// Book seats locked by the buyer and issue one entry per seat.
#[instrument(skip(state, req, seat_ids), fields(ticket_id = req.ticket_id))]
pub async fn confirm_seats(
    state: &AppState,
    req: &IssueRequest<'_>,
    seat_ids: &[String],
) -> Result<Vec<IssuedTicket>, AppError> {
    seats::confirm(&state.db, req.event_id, req.ticket_id, req.buyer_id, seat_ids).await?;
    state.cache.invalidate(&ticket_list_key(req.event_id));

    let seats: Vec<Option<String>> = seat_ids.iter().cloned().map(Some).collect();
    issue_signed(state, req, &seats).await
}

async fn issue_signed(
    state: &AppState,
    req: &IssueRequest<'_>,
    seats: &[Option<String>],
) -> Result<Vec<IssuedTicket>, AppError> {
    let issued = issuance::issue(&state.db, req, seats).await.map_err(|e| {
        error!(error = %e, count = seats.len(), "Issuance failed after inventory was taken");
        AppError::PersistenceFailed {
            message: "Inventory was reserved but tickets could not be stored".into(),
            partial: true,
        }
    })?;

    let secret = state.config.ticket.qr_secret.as_bytes();
    let now = Utc::now().timestamp();
    issued
        .into_iter()
        .map(|t| {
            let qr = qr::sign(secret, &t.event_id, &t.ticket_id, &t.unique_code, now)?;
            Ok(IssuedTicket {
                unique_code: t.unique_code,
                qr,
                seat_id: t.seat_id,
            })
        })
        .collect()
}

async fn find_code(
    db: &DatabaseConnection,
    code: &str,
) -> Result<Option<purchased_ticket::Model>, AppError> {
    Ok(purchased_ticket::Entity::find_by_id(code).one(db).await?)
}

/// Whether an entry is valid for `event_id`.
///
/// A signed payload must pass the signature and drift checks before its
/// code is looked up; a bare code is only looked up.
pub async fn verify(
    state: &AppState,
    event_id: &str,
    query: &VerifyQuery,
) -> Result<bool, AppError> {
    if let Some(payload) = query.payload.as_deref() {
        let claims = qr::verify(
            state.config.ticket.qr_secret.as_bytes(),
            payload,
            Utc::now().timestamp(),
            state.config.ticket.qr_drift_secs,
        )?;
        if claims.event_id != event_id {
            return Ok(false);
        }
        let stored = find_code(&state.db, &claims.code).await?;
        return Ok(stored.is_some_and(|t| t.event_id == event_id && t.ticket_id == claims.ticket_id));
    }

    let code = query
        .unique_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("uniqueCode or payload is required".into()))?;
    let stored = find_code(&state.db, code).await?;
    Ok(stored.is_some_and(|t| t.event_id == event_id))
}

/// Sign a fresh payload for a code the caller bought.
pub async fn fresh_qr(
    state: &AppState,
    event_id: &str,
    ticket_id: &str,
    code: &str,
    user_id: &str,
) -> Result<(String, i64), AppError> {
    let entry = find_code(&state.db, code)
        .await?
        .filter(|t| t.event_id == event_id && t.ticket_id == ticket_id)
        .ok_or_else(|| AppError::NotFound("Ticket code not found".into()))?;
    if entry.buyer_id != user_id {
        return Err(AppError::Forbidden("Only the buyer can show this ticket".into()));
    }

    let now = Utc::now().timestamp();
    let payload = qr::sign(
        state.config.ticket.qr_secret.as_bytes(),
        &entry.event_id,
        &entry.ticket_id,
        &entry.unique_code,
        now,
    )?;
    Ok((payload, now))
}
