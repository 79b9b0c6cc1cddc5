//! Unique codes and purchased-ticket rows.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use sea_orm::*;
use tracing::{info, instrument};

use crate::entity::{purchased_ticket, user_data};
use crate::utils::user_data as index;

/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_code() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Who is buying what.
#[derive(Debug, Clone)]
pub struct IssueRequest<'a> {
    pub event_id: &'a str,
    pub ticket_id: &'a str,
    pub buyer_id: &'a str,
    pub buyer_name: &'a str,
}

/// Insert one purchased ticket per entry of `seats` (`None` for unseated
/// entries) plus the buyer's index rows, all in one transaction.
#[instrument(skip(db, req), fields(ticket_id = req.ticket_id, count = seats.len()))]
pub async fn issue(
    db: &DatabaseConnection,
    req: &IssueRequest<'_>,
    seats: &[Option<String>],
) -> Result<Vec<purchased_ticket::Model>, DbErr> {
    let now = Utc::now();
    let issued: Vec<purchased_ticket::Model> = seats
        .iter()
        .map(|seat| purchased_ticket::Model {
            unique_code: generate_code(),
            event_id: req.event_id.to_string(),
            ticket_id: req.ticket_id.to_string(),
            buyer_id: req.buyer_id.to_string(),
            buyer_name: req.buyer_name.to_string(),
            seat_id: seat.clone(),
            purchased_at: now,
        })
        .collect();

    let txn = db.begin().await?;
    purchased_ticket::Entity::insert_many(
        issued
            .iter()
            .cloned()
            .map(purchased_ticket::ActiveModel::from),
    )
    .exec_without_returning(&txn)
    .await?;

    index::insert_entries(
        &txn,
        issued
            .iter()
            .map(|t| {
                index::entry(
                    req.buyer_id,
                    user_data::TICKET,
                    &t.unique_code,
                    user_data::TICKET,
                    req.ticket_id,
                )
            })
            .collect(),
    )
    .await?;
    txn.commit().await?;

    info!(count = issued.len(), "Issued tickets");
    Ok(issued)
}
