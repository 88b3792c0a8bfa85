//! Webhook signature verification.
//!
//! Stripe signs `{timestamp}.{payload}` with HMAC-SHA256 and sends
//! `t=...,v1=...` in the `Stripe-Signature` header; the timestamp must be
//! within a fixed tolerance of the server clock. BoomFi signs the raw body
//! directly. All comparisons are constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted skew between the signature timestamp and the server
/// clock, in seconds.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Verifies a `Stripe-Signature` header against the raw request body.
///
/// The header may carry several `v1` entries during secret rotation; any
/// matching one is accepted.
pub fn verify_stripe_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now_unix: i64,
) -> Result<(), ApiError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0].trim() {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => candidates.push(kv[1]),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or(ApiError::InvalidSignature(
        "missing timestamp in signature header",
    ))?;
    if candidates.is_empty() {
        return Err(ApiError::InvalidSignature(
            "missing v1 signature in signature header",
        ));
    }

    if (now_unix - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now_unix,
            diff = (now_unix - timestamp).abs(),
            "webhook timestamp outside tolerance"
        );
        return Err(ApiError::InvalidSignature("timestamp outside tolerance"));
    }

    // The endpoint secret carries a "whsec_" prefix; the key is the rest.
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| ApiError::InvalidSignature("invalid webhook secret key"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());

    let matched = candidates
        .iter()
        .any(|candidate| computed.as_bytes().ct_eq(candidate.as_bytes()).into());
    if !matched {
        return Err(ApiError::InvalidSignature("signature mismatch"));
    }
    Ok(())
}

/// Verifies a hex-encoded HMAC-SHA256 of the raw body, as sent by BoomFi.
pub fn verify_boomfi_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
) -> Result<(), ApiError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiError::InvalidSignature("invalid webhook secret key"))?;
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed.as_bytes().ct_eq(header.trim().as_bytes()).into() {
        Ok(())
    } else {
        Err(ApiError::InvalidSignature("signature mismatch"))
    }
}
