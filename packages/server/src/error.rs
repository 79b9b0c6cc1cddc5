use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::storage::StorageError;
use media::MediaError;
use sea_orm::DbErr;
use serde::Serialize;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Always `false`.
    pub ok: bool,
    /// Machine-readable error kind, e.g. `invalid_input`, `not_found`,
    /// `seat_conflict`, `insufficient_inventory`, `file_too_large`.
    #[schema(example = "insufficient_inventory")]
    pub error: &'static str,
    /// Human-readable error description.
    #[schema(example = "Only 0 tickets left")]
    pub message: String,
    /// Set when an earlier step already committed, e.g. inventory was taken
    /// but issued tickets could not be stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_success: Option<bool>,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    TokenMissing,
    TokenInvalid,
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    SeatConflict(String),
    InsufficientInventory(String),
    FileTooLarge(String),
    InvalidMime(String),
    InvalidExtension(String),
    VirusDetected(String),
    NoMediaUploaded,
    DecodeFailed(String),
    TranscodeFailed(String),
    /// Storage failed after an earlier write committed.
    PersistenceFailed {
        message: String,
        partial: bool,
    },
    UpstreamTimeout(String),
    SignatureInvalid,
    ExpiredPayload,
    Internal(String),
}

impl AppError {
    /// Wire name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "invalid_input",
            AppError::TokenMissing | AppError::TokenInvalid => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::SeatConflict(_) => "seat_conflict",
            AppError::InsufficientInventory(_) => "insufficient_inventory",
            AppError::FileTooLarge(_) => "file_too_large",
            AppError::InvalidMime(_) => "invalid_mime",
            AppError::InvalidExtension(_) => "invalid_extension",
            AppError::VirusDetected(_) => "virus_signature_matched",
            AppError::NoMediaUploaded => "no_media_uploaded",
            AppError::DecodeFailed(_) => "decode_failed",
            AppError::TranscodeFailed(_) => "transcode_failed",
            AppError::PersistenceFailed { .. } => "persistence_failed",
            AppError::UpstreamTimeout(_) => "upstream_timeout",
            AppError::SignatureInvalid => "signature_invalid",
            AppError::ExpiredPayload => "expired_payload",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidExtension(_) | AppError::NoMediaUploaded => {
                StatusCode::BAD_REQUEST
            }
            AppError::SignatureInvalid => StatusCode::BAD_REQUEST,
            AppError::TokenMissing | AppError::TokenInvalid => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_)
            | AppError::SeatConflict(_)
            | AppError::InsufficientInventory(_) => StatusCode::CONFLICT,
            AppError::ExpiredPayload => StatusCode::GONE,
            AppError::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::InvalidMime(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::VirusDetected(_) | AppError::DecodeFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::TranscodeFailed(_)
            | AppError::PersistenceFailed { .. }
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Message safe to show to the client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::SeatConflict(msg)
            | AppError::InsufficientInventory(msg)
            | AppError::FileTooLarge(msg)
            | AppError::InvalidMime(msg)
            | AppError::InvalidExtension(msg)
            | AppError::VirusDetected(msg)
            | AppError::DecodeFailed(msg)
            | AppError::UpstreamTimeout(msg) => msg.clone(),
            AppError::TokenMissing => "Authentication required".into(),
            AppError::TokenInvalid => "Invalid or expired token".into(),
            AppError::NoMediaUploaded => "This post type requires at least one media file".into(),
            AppError::TranscodeFailed(_) => "Media could not be transcoded".into(),
            AppError::PersistenceFailed { message, .. } => message.clone(),
            AppError::SignatureInvalid => "Payload signature is invalid".into(),
            AppError::ExpiredPayload => "Payload has expired".into(),
            AppError::Internal(_) => "An unexpected error occurred".into(),
        }
    }

    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match &self {
            AppError::Internal(detail) => tracing::error!("Internal error: {}", detail),
            AppError::TranscodeFailed(detail) => tracing::error!("Transcode failed: {}", detail),
            AppError::PersistenceFailed { message, partial } => {
                tracing::error!(partial, "Persistence failed: {}", message)
            }
            _ => {}
        }

        let partial_success = match &self {
            AppError::PersistenceFailed { partial, .. } => Some(*partial),
            _ => None,
        };

        (
            self.status(),
            ErrorBody {
                ok: false,
                error: self.kind(),
                message: self.public_message(),
                partial_success,
            },
        )
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.public_message())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::ConnectionAcquire(e) => {
                AppError::UpstreamTimeout(format!("Database unavailable: {e}"))
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SizeLimitExceeded { limit, .. } => {
                AppError::FileTooLarge(format!("File exceeds maximum size of {limit} bytes"))
            }
            StorageError::NotFound(path) => AppError::NotFound(format!("File '{path}' not found")),
            StorageError::InvalidPath(path) => {
                AppError::Validation(format!("Invalid storage path '{path}'"))
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Decode(msg) | MediaError::Probe(msg) => {
                AppError::DecodeFailed(format!("Media could not be decoded: {msg}"))
            }
            MediaError::Timeout { tool, secs } => {
                AppError::UpstreamTimeout(format!("{tool} did not finish within {secs}s"))
            }
            other => AppError::TranscodeFailed(other.to_string()),
        }
    }
}
