//! Signed QR payloads: `b64(event|ticket|code|ts|hex(hmac))`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Decoded fields of a verified payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrClaims {
    pub event_id: String,
    pub ticket_id: String,
    pub code: String,
    pub issued_at: i64,
}

fn mac(secret: &[u8], message: &str) -> Result<Vec<u8>, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(format!("qr key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sign(
    secret: &[u8],
    event_id: &str,
    ticket_id: &str,
    code: &str,
    issued_at: i64,
) -> Result<String, AppError> {
    let message = format!("{event_id}|{ticket_id}|{code}|{issued_at}");
    let signature = hex::encode(mac(secret, &message)?);
    Ok(STANDARD.encode(format!("{message}|{signature}")))
}

/// Check the signature first, then the timestamp drift against `now`.
pub fn verify(secret: &[u8], payload: &str, now: i64, max_drift: i64) -> Result<QrClaims, AppError> {
    let raw = STANDARD
        .decode(payload.trim())
        .map_err(|_| AppError::SignatureInvalid)?;
    let raw = String::from_utf8(raw).map_err(|_| AppError::SignatureInvalid)?;

    let parts: Vec<&str> = raw.split('|').collect();
    let [event_id, ticket_id, code, ts, signature] = parts[..] else {
        return Err(AppError::SignatureInvalid);
    };

    let provided = hex::decode(signature).map_err(|_| AppError::SignatureInvalid)?;
    let message = format!("{event_id}|{ticket_id}|{code}|{ts}");
    let expected = mac(secret, &message)?;
    if !bool::from(expected.ct_eq(&provided)) {
        return Err(AppError::SignatureInvalid);
    }

    let issued_at: i64 = ts.parse().map_err(|_| AppError::SignatureInvalid)?;
    if (now - issued_at).abs() > max_drift {
        return Err(AppError::ExpiredPayload);
    }

    Ok(QrClaims {
        event_id: event_id.to_string(),
        ticket_id: ticket_id.to_string(),
        code: code.to_string(),
        issued_at,
    })
}
