use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use common::{EntityEvent, EventMethod};
use tracing::{info, instrument};

use crate::cache::ticket_list_key;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::form::FormFields;
use crate::extractors::json::AppJson;
use crate::models::shared::{ApiResponse, ok};
use crate::models::ticket::*;
use crate::reservation::{self, issuance::IssueRequest, tickets};
use crate::state::AppState;

fn emit_ticket(state: &AppState, method: EventMethod, event_id: &str, ticket_id: &str) {
    state.events.entity(
        "ticket",
        EntityEvent::new("event", event_id, method, "ticket", ticket_id),
    );
}

#[utoipa::path(
    post,
    path = "/api/v1/ticket/event/{event}",
    tag = "Tickets",
    operation_id = "createTicket",
    summary = "Create a ticket type",
    description = "Form fields (multipart or urlencoded): `name`, `price`, `currency`, `quantity`, \
        `color`, optional `seatPrefix`, `seatStart` and `seatEnd`. A seat range must hold exactly \
        `quantity` seats; its seats are created as available.",
    params(("event" = String, Path, description = "Event ID")),
    responses(
        (status = 201, description = "Ticket created", body = TicketResponse),
        (status = 400, description = "Validation error (invalid_input)", body = ErrorBody),
        (status = 401, description = "Unauthorized (unauthorized)", body = ErrorBody),
        (status = 409, description = "Seat label clash (conflict)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, form), fields(user = %auth_user.user_id))]
pub async fn create_ticket(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    form: FormFields,
) -> Result<impl IntoResponse, AppError> {
    validate_event_id(&event_id)?;
    let draft = TicketDraft::from_form(&form)?;

    let model = tickets::create(&state.db, &event_id, &auth_user.user_id, draft).await?;
    state.cache.invalidate(&ticket_list_key(&event_id));
    emit_ticket(&state, EventMethod::Post, &event_id, &model.id);

    info!(ticket_id = %model.id, "Ticket created");
    Ok((StatusCode::CREATED, ok(TicketResponse::from(model))))
}

#[utoipa::path(
    get,
    path = "/api/v1/ticket/event/{event}",
    tag = "Tickets",
    operation_id = "listTickets",
    summary = "List ticket types of an event",
    params(("event" = String, Path, description = "Event ID")),
    responses(
        (status = 200, description = "Tickets, oldest first", body = Vec<TicketResponse>),
        (status = 400, description = "Invalid event id (invalid_input)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn list_tickets(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<TicketResponse>>>, AppError> {
    validate_event_id(&event_id)?;
    Ok(ok(tickets::list(&state.db, &state.cache, &event_id).await?))
}

#[utoipa::path(
    patch,
    path = "/api/v1/ticket/event/{event}/{ticket}",
    tag = "Tickets",
    operation_id = "editTicket",
    summary = "Edit a ticket type",
    description = "Same form fields as create, all optional. A new `quantity` keeps sold entries \
        and must not drop below them. Creator only.",
    params(
        ("event" = String, Path, description = "Event ID"),
        ("ticket" = String, Path, description = "Ticket ID"),
    ),
    responses(
        (status = 200, description = "Ticket updated", body = TicketResponse),
        (status = 400, description = "Validation error (invalid_input)", body = ErrorBody),
        (status = 403, description = "Not the creator (forbidden)", body = ErrorBody),
        (status = 404, description = "Ticket not found (not_found)", body = ErrorBody),
        (status = 409, description = "Sold concurrently, retry (conflict)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, form), fields(user = %auth_user.user_id))]
pub async fn edit_ticket(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((event_id, ticket_id)): Path<(String, String)>,
    form: FormFields,
) -> Result<Json<ApiResponse<TicketResponse>>, AppError> {
    let patch = TicketPatch::from_form(&form)?;
    let model = tickets::edit(&state.db, &event_id, &ticket_id, &auth_user.user_id, patch).await?;
    state.cache.invalidate(&ticket_list_key(&event_id));
    emit_ticket(&state, EventMethod::Put, &event_id, &ticket_id);

    Ok(ok(TicketResponse::from(model)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/ticket/event/{event}/{ticket}",
    tag = "Tickets",
    operation_id = "deleteTicket",
    summary = "Delete an unsold ticket type",
    params(
        ("event" = String, Path, description = "Event ID"),
        ("ticket" = String, Path, description = "Ticket ID"),
    ),
    responses(
        (status = 204, description = "Ticket deleted"),
        (status = 403, description = "Not the creator (forbidden)", body = ErrorBody),
        (status = 404, description = "Ticket not found (not_found)", body = ErrorBody),
        (status = 409, description = "Entries were already sold (conflict)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user = %auth_user.user_id))]
pub async fn delete_ticket(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((event_id, ticket_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    tickets::delete(&state.db, &event_id, &ticket_id, &auth_user.user_id).await?;
    state.cache.invalidate(&ticket_list_key(&event_id));
    emit_ticket(&state, EventMethod::Delete, &event_id, &ticket_id);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/ticket/event/{event}/{ticket}/buy",
    tag = "Tickets",
    operation_id = "buyTicket",
    summary = "Buy unseated entries",
    description = "Atomically takes `quantity` entries from inventory and issues one code plus \
        signed QR payload per entry. If the entries cannot be stored after inventory was taken \
        the error carries `partial_success: true`.",
    params(
        ("event" = String, Path, description = "Event ID"),
        ("ticket" = String, Path, description = "Ticket ID"),
    ),
    request_body = BuyRequest,
    responses(
        (status = 200, description = "Entries issued", body = PurchaseResponse),
        (status = 400, description = "Quantity out of range (invalid_input)", body = ErrorBody),
        (status = 404, description = "Ticket not found (not_found)", body = ErrorBody),
        (status = 409, description = "Not enough entries left (insufficient_inventory)", body = ErrorBody),
        (status = 500, description = "Issued entries not stored (persistence_failed)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user = %auth_user.user_id, quantity = payload.quantity))]
pub async fn buy_ticket(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((event_id, ticket_id)): Path<(String, String)>,
    AppJson(payload): AppJson<BuyRequest>,
) -> Result<Json<PurchaseResponse>, AppError> {
    let req = IssueRequest {
        event_id: &event_id,
        ticket_id: &ticket_id,
        buyer_id: &auth_user.user_id,
        buyer_name: &auth_user.username,
    };
    let issued = reservation::purchase(&state, &req, payload.quantity).await?;

    info!(count = issued.len(), "Tickets purchased");
    Ok(Json(PurchaseResponse {
        success: true,
        tickets: issued,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/ticket/event/{event}/{ticket}/seats/regenerate",
    tag = "Tickets",
    operation_id = "regenerateSeats",
    summary = "Rebuild seats from the ticket's seat range",
    description = "Replaces all seats of the ticket. Refused while any seat is booked or locked.",
    params(
        ("event" = String, Path, description = "Event ID"),
        ("ticket" = String, Path, description = "Ticket ID"),
    ),
    responses(
        (status = 200, description = "Seat labels", body = RegenerateResponse),
        (status = 400, description = "No seat range (invalid_input)", body = ErrorBody),
        (status = 403, description = "Not the creator (forbidden)", body = ErrorBody),
        (status = 409, description = "Seats in use (conflict)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user = %auth_user.user_id))]
pub async fn regenerate_seats(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((event_id, ticket_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<RegenerateResponse>>, AppError> {
    let seats =
        tickets::regenerate_seats(&state.db, &event_id, &ticket_id, &auth_user.user_id).await?;
    Ok(ok(RegenerateResponse { seats }))
}

#[utoipa::path(
    get,
    path = "/api/v1/ticket/event/{event}/{ticket}/qr/{code}",
    tag = "Tickets",
    operation_id = "getTicketQr",
    summary = "Fresh signed QR payload",
    description = "Signs a new payload for a code the caller bought.",
    params(
        ("event" = String, Path, description = "Event ID"),
        ("ticket" = String, Path, description = "Ticket ID"),
        ("code" = String, Path, description = "Unique code"),
    ),
    responses(
        (status = 200, description = "Signed payload", body = QrResponse),
        (status = 403, description = "Not the buyer (forbidden)", body = ErrorBody),
        (status = 404, description = "Code not found (not_found)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, code), fields(user = %auth_user.user_id))]
pub async fn ticket_qr(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((event_id, ticket_id, code)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<QrResponse>>, AppError> {
    let (payload, issued_at) =
        reservation::fresh_qr(&state, &event_id, &ticket_id, &code, &auth_user.user_id).await?;
    Ok(ok(QrResponse { payload, issued_at }))
}

#[utoipa::path(
    get,
    path = "/api/v1/ticket/verify/{event}",
    tag = "Tickets",
    operation_id = "verifyTicket",
    summary = "Check an entry at the door",
    description = "`uniqueCode` looks the code up. `payload` verifies a signed QR payload \
        (signature, then age, then storage). A tampered payload is `signature_invalid`, a stale \
        one `expired_payload`.",
    params(("event" = String, Path, description = "Event ID"), VerifyQuery),
    responses(
        (status = 200, description = "Verification result", body = VerifyResponse),
        (status = 400, description = "Missing input or bad signature (invalid_input, signature_invalid)", body = ErrorBody),
        (status = 410, description = "Payload too old (expired_payload)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, query))]
pub async fn verify_ticket(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResponse>, AppError> {
    let is_valid = reservation::verify(&state, &event_id, &query).await?;
    Ok(Json(VerifyResponse { is_valid }))
}
