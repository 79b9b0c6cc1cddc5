use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use tracing::{info, instrument};

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::AppJson;
use crate::models::shared::{ApiResponse, ok};
use crate::models::ticket::*;
use crate::reservation::{self, issuance::IssueRequest, seats};
use crate::state::AppState;

/// The body names the acting user; it has to be the token's user.
fn acting_user<'a>(auth_user: &'a AuthUser, req: &SeatRequest) -> Result<&'a str, AppError> {
    if req.user_id != auth_user.user_id {
        return Err(AppError::Forbidden(
            "user_id does not match the authenticated user".into(),
        ));
    }
    Ok(&auth_user.user_id)
}

#[utoipa::path(
    get,
    path = "/api/v1/seats/{event}",
    tag = "Seats",
    operation_id = "getSeatMap",
    summary = "Seat map of an event",
    description = "Seats with their effective status: a lock past its expiry reads as `available`.",
    params(("event" = String, Path, description = "Event ID"), SeatMapQuery),
    responses(
        (status = 200, description = "Seats", body = Vec<SeatView>),
    ),
)]
#[instrument(skip(state, query))]
pub async fn seat_map(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(query): Query<SeatMapQuery>,
) -> Result<Json<ApiResponse<Vec<SeatView>>>, AppError> {
    let now_ms = Utc::now().timestamp_millis();
    let rows = seats::list(&state.db, &event_id, query.ticket_id.as_deref()).await?;
    Ok(ok(rows.into_iter().map(|s| SeatView::new(s, now_ms)).collect()))
}

#[utoipa::path(
    post,
    path = "/api/v1/seats/{event}/lock-seats",
    tag = "Seats",
    operation_id = "lockSeats",
    summary = "Hold seats for checkout",
    description = "All-or-nothing. Seats held by the caller are re-locked with a new expiry.",
    params(("event" = String, Path, description = "Event ID")),
    request_body = SeatRequest,
    responses(
        (status = 200, description = "Seats locked", body = SeatLockResponse),
        (status = 400, description = "Bad seat list (invalid_input)", body = ErrorBody),
        (status = 403, description = "user_id mismatch (forbidden)", body = ErrorBody),
        (status = 404, description = "Unknown seat (not_found)", body = ErrorBody),
        (status = 409, description = "Seat held or booked (seat_conflict)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user = %auth_user.user_id))]
pub async fn lock_seats(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    AppJson(payload): AppJson<SeatRequest>,
) -> Result<Json<ApiResponse<SeatLockResponse>>, AppError> {
    let user_id = acting_user(&auth_user, &payload)?;
    let seat_ids = seats::normalize_seat_ids(&payload.seats)?;
    let expires_at = seats::lock(
        &state.db,
        &event_id,
        user_id,
        &seat_ids,
        state.config.ticket.seat_lock_ttl_secs,
    )
    .await?;

    Ok(ok(SeatLockResponse {
        seats: seat_ids,
        expires_at,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/seats/{event}/unlock-seats",
    tag = "Seats",
    operation_id = "unlockSeats",
    summary = "Release held seats",
    description = "All-or-nothing. Every listed seat must be locked by the caller.",
    params(("event" = String, Path, description = "Event ID")),
    request_body = SeatRequest,
    responses(
        (status = 200, description = "Seats released", body = SeatReleaseResponse),
        (status = 403, description = "user_id mismatch (forbidden)", body = ErrorBody),
        (status = 404, description = "Unknown seat (not_found)", body = ErrorBody),
        (status = 409, description = "Seat not held by the caller (seat_conflict)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user = %auth_user.user_id))]
pub async fn unlock_seats(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    AppJson(payload): AppJson<SeatRequest>,
) -> Result<Json<ApiResponse<SeatReleaseResponse>>, AppError> {
    let user_id = acting_user(&auth_user, &payload)?;
    let seat_ids = seats::normalize_seat_ids(&payload.seats)?;
    seats::unlock(&state.db, &event_id, user_id, &seat_ids).await?;
    Ok(ok(SeatReleaseResponse { seats: seat_ids }))
}

#[utoipa::path(
    post,
    path = "/api/v1/seats/{event}/ticket/{ticket}/confirm-purchase",
    tag = "Seats",
    operation_id = "confirmSeatPurchase",
    summary = "Book held seats and issue entries",
    description = "Every seat must be locked by the caller, unexpired and belong to the ticket. \
        Seats are booked and inventory decremented in one transaction.",
    params(
        ("event" = String, Path, description = "Event ID"),
        ("ticket" = String, Path, description = "Ticket ID"),
    ),
    request_body = SeatRequest,
    responses(
        (status = 200, description = "Entries issued", body = PurchaseResponse),
        (status = 403, description = "user_id mismatch (forbidden)", body = ErrorBody),
        (status = 409, description = "Lock missing or expired (seat_conflict, insufficient_inventory)", body = ErrorBody),
        (status = 500, description = "Issued entries not stored (persistence_failed)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user = %auth_user.user_id))]
pub async fn confirm_purchase(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((event_id, ticket_id)): Path<(String, String)>,
    AppJson(payload): AppJson<SeatRequest>,
) -> Result<Json<PurchaseResponse>, AppError> {
    let user_id = acting_user(&auth_user, &payload)?;
    let seat_ids = seats::normalize_seat_ids(&payload.seats)?;
    let req = IssueRequest {
        event_id: &event_id,
        ticket_id: &ticket_id,
        buyer_id: user_id,
        buyer_name: &auth_user.username,
    };
    let issued = reservation::confirm_seats(&state, &req, &seat_ids).await?;

    info!(count = issued.len(), "Seats purchased");
    Ok(Json(PurchaseResponse {
        success: true,
        tickets: issued,
    }))
}
