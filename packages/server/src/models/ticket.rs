use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::entity::{seat, ticket};
use crate::error::AppError;
use crate::extractors::form::FormFields;

const MAX_NAME_LEN: usize = 100;
const MAX_COLOR_LEN: usize = 32;
const MAX_PREFIX_LEN: usize = 8;
const MAX_SEATS_PER_TICKET: i32 = 10_000;
const DEFAULT_COLOR: &str = "#ffffff";

/// Event ids are opaque, but they end up in cache keys and log fields.
pub fn validate_event_id(event_id: &str) -> Result<(), AppError> {
    let ok = !event_id.is_empty()
        && event_id.len() <= 64
        && event_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid event id '{event_id}'")))
    }
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "name must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_price(price: f64) -> Result<f64, AppError> {
    if !price.is_finite() || price < 0.0 {
        return Err(AppError::Validation("price must be a non-negative number".into()));
    }
    Ok(price)
}

fn validate_currency(currency: &str) -> Result<String, AppError> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::Validation(
            "currency must be a 3-letter code".into(),
        ));
    }
    Ok(currency.to_ascii_uppercase())
}

fn validate_color(color: &str) -> Result<String, AppError> {
    if color.len() > MAX_COLOR_LEN {
        return Err(AppError::Validation("color is too long".into()));
    }
    Ok(color.to_string())
}

fn validate_prefix(prefix: &str) -> Result<String, AppError> {
    if prefix.len() > MAX_PREFIX_LEN || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::Validation(format!(
            "seatPrefix must be at most {MAX_PREFIX_LEN} alphanumeric characters"
        )));
    }
    Ok(prefix.to_ascii_uppercase())
}

/// Checks `1 <= start <= end` and a sane seat count.
pub fn validate_seat_range(start: i32, end: i32) -> Result<i32, AppError> {
    if start < 1 || end < start {
        return Err(AppError::Validation(
            "seatStart and seatEnd must satisfy 1 <= seatStart <= seatEnd".into(),
        ));
    }
    let count = end - start + 1;
    if count > MAX_SEATS_PER_TICKET {
        return Err(AppError::Validation(format!(
            "A ticket can have at most {MAX_SEATS_PER_TICKET} seats"
        )));
    }
    Ok(count)
}

/// Validated ticket creation form.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketDraft {
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub quantity: i32,
    pub color: String,
    pub seat_prefix: String,
    pub seat_range: Option<(i32, i32)>,
}

impl TicketDraft {
    /// Parse `name, price, currency, quantity, color, seatStart, seatEnd`
    /// and the optional `seatPrefix`.
    ///
    /// A seat range, when given, must hold exactly `quantity` seats.
    pub fn from_form(form: &FormFields) -> Result<Self, AppError> {
        let name = validate_name(form.require("name")?)?;
        let price = validate_price(
            form.parse::<f64>("price")?
                .ok_or_else(|| AppError::Validation("Missing field 'price'".into()))?,
        )?;
        let currency = validate_currency(form.require("currency")?)?;
        let quantity = form
            .parse::<i32>("quantity")?
            .ok_or_else(|| AppError::Validation("Missing field 'quantity'".into()))?;
        if quantity < 1 {
            return Err(AppError::Validation("quantity must be at least 1".into()));
        }
        let color = validate_color(form.get("color").unwrap_or(DEFAULT_COLOR))?;
        let seat_prefix = validate_prefix(form.get("seatPrefix").unwrap_or_default())?;

        let seat_range = match (form.parse::<i32>("seatStart")?, form.parse::<i32>("seatEnd")?) {
            (Some(start), Some(end)) => {
                let count = validate_seat_range(start, end)?;
                if count != quantity {
                    return Err(AppError::Validation(format!(
                        "Seat range holds {count} seats but quantity is {quantity}"
                    )));
                }
                Some((start, end))
            }
            (None, None) => None,
            _ => {
                return Err(AppError::Validation(
                    "seatStart and seatEnd must be given together".into(),
                ));
            }
        };

        Ok(Self {
            name,
            price,
            currency,
            quantity,
            color,
            seat_prefix,
            seat_range,
        })
    }
}

/// Partial ticket edit. Absent fields stay unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketPatch {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub color: Option<String>,
    pub quantity: Option<i32>,
    pub seat_prefix: Option<String>,
    pub seat_range: Option<(i32, i32)>,
}

impl TicketPatch {
    pub fn from_form(form: &FormFields) -> Result<Self, AppError> {
        let seat_range = match (form.parse::<i32>("seatStart")?, form.parse::<i32>("seatEnd")?) {
            (Some(start), Some(end)) => {
                validate_seat_range(start, end)?;
                Some((start, end))
            }
            (None, None) => None,
            _ => {
                return Err(AppError::Validation(
                    "seatStart and seatEnd must be given together".into(),
                ));
            }
        };
        let quantity = form.parse::<i32>("quantity")?;
        if quantity.is_some_and(|q| q < 1) {
            return Err(AppError::Validation("quantity must be at least 1".into()));
        }

        Ok(Self {
            name: form.get("name").map(validate_name).transpose()?,
            price: form.parse::<f64>("price")?.map(validate_price).transpose()?,
            currency: form.get("currency").map(validate_currency).transpose()?,
            color: form.get("color").map(validate_color).transpose()?,
            quantity,
            seat_prefix: form.get("seatPrefix").map(validate_prefix).transpose()?,
            seat_range,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TicketResponse {
    pub id: String,
    pub event_id: String,
    pub creator_id: String,
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub color: String,
    pub quantity: i32,
    pub available: i32,
    pub total: i32,
    pub sold: i32,
    pub seat_prefix: String,
    pub seat_start: Option<i32>,
    pub seat_end: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ticket::Model> for TicketResponse {
    fn from(m: ticket::Model) -> Self {
        Self {
            id: m.id,
            event_id: m.event_id,
            creator_id: m.creator_id,
            name: m.name,
            price: m.price,
            currency: m.currency,
            color: m.color,
            quantity: m.quantity,
            available: m.available,
            total: m.total,
            sold: m.sold,
            seat_prefix: m.seat_prefix,
            seat_start: m.seat_start,
            seat_end: m.seat_end,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BuyRequest {
    #[schema(example = 1)]
    pub quantity: i32,
}

/// One issued entry as returned to the buyer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedTicket {
    pub unique_code: String,
    /// Signed QR payload, valid for the configured drift window.
    pub qr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat_id: Option<String>,
}

/// Purchase result. Kept in the flat `{success, tickets}` shape.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PurchaseResponse {
    pub success: bool,
    pub tickets: Vec<IssuedTicket>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    /// Look the code up in storage.
    pub unique_code: Option<String>,
    /// Verify a signed QR payload, then look its code up.
    pub payload: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QrResponse {
    pub payload: String,
    pub issued_at: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SeatRequest {
    /// Must match the authenticated user.
    pub user_id: String,
    #[schema(example = json!(["A5", "A6"]))]
    pub seats: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SeatLockResponse {
    pub seats: Vec<String>,
    /// Unix milliseconds.
    pub expires_at: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SeatReleaseResponse {
    pub seats: Vec<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SeatMapQuery {
    /// Only seats of this ticket.
    pub ticket_id: Option<String>,
}

/// A seat as readers see it. The lock holder is not exposed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SeatView {
    pub seat_id: String,
    pub ticket_id: String,
    #[schema(example = "available")]
    pub status: String,
}

impl SeatView {
    pub fn new(model: seat::Model, now_ms: i64) -> Self {
        let status = crate::reservation::seats::effective_status(&model, now_ms).to_string();
        Self {
            seat_id: model.seat_id,
            ticket_id: model.ticket_id,
            status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegenerateResponse {
    pub seats: Vec<String>,
}
