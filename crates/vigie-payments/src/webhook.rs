//! Webhook signature verification.
//!
//! Confirmation webhooks carry a signature header of the form
//! `t=<unix-seconds>,v1=<hex>` where `v1` is the HMAC-SHA256 of
//! `"<t>.<raw body>"` under the shared webhook secret. The timestamp is
//! bounded to a tolerance window so a captured request cannot be replayed
//! later.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted skew between the header timestamp and now, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Why a signature header was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance window")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

/// Computes the hex signature for a payload at a given timestamp.
///
/// The verification counterpart is [`verify_signature`]; this side is used
/// by tests and local tooling that fabricate webhook requests.
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Builds a complete signature header for a payload.
pub fn signature_header(secret: &str, payload: &[u8], timestamp: i64) -> String {
    format!("t={timestamp},v1={}", sign(secret, payload, timestamp))
}

/// Verifies a webhook signature header against the raw request body.
///
/// `now` is the caller's clock in unix seconds; the header timestamp must
/// fall within [`SIGNATURE_TOLERANCE_SECS`] of it in either direction.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let (timestamp, provided) = parse_header(header)?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }

    let provided = hex::decode(provided).map_err(|_| SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // verify_slice is constant-time.
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

fn parse_header(header: &str) -> Result<(i64, &str), SignatureError> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?);
            }
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }

    match (timestamp, signature) {
        (Some(t), Some(s)) if !s.is_empty() => Ok((t, s)),
        _ => Err(SignatureError::Malformed),
    }
}
