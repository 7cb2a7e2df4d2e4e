//! Webhook signature verification.
//!
//! The payment provider signs each delivery with an HMAC-SHA256 over
//! `"{timestamp}.{payload}"` and sends the result in a header of the form
//! `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`. Verification checks the
//! timestamp against a tolerance window and compares signatures in constant
//! time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature verification failures.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The header is missing required parts or is not parseable.
    #[error("malformed signature header")]
    Malformed,

    /// The signature timestamp is outside the tolerance window.
    #[error("signature timestamp outside tolerance")]
    Expired,

    /// No candidate signature matched the expected value.
    #[error("signature mismatch")]
    Mismatch,
}

/// Compute HMAC-SHA256 and return hex-encoded result.
///
/// # Panics
///
/// This function will never panic in practice. The `expect` call is guarded
/// by the invariant that HMAC-SHA256 accepts keys of any size per RFC 2104.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // INVARIANT: HMAC-SHA256 accepts keys of any size per RFC 2104, so
    // `new_from_slice` only fails if the Hmac implementation is broken.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    let result = mac.finalize();

    hex::encode(result.into_bytes())
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Verify a provider signature header against the raw payload.
///
/// `now_epoch_seconds` is injected so callers (and tests) control the clock.
///
/// # Errors
///
/// Returns a [`SignatureError`] describing why verification failed.
pub fn verify_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now_epoch_seconds: i64,
) -> Result<(), SignatureError> {
    // Parse the header: t=timestamp,v1=signature[,v1=signature...]
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(ts)) => timestamp = ts.trim().parse().ok(),
            (Some("v1"), Some(sig)) => signatures.push(sig.trim()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }

    if (now_epoch_seconds - timestamp).abs() > tolerance_seconds {
        return Err(SignatureError::Expired);
    }

    let signed_payload = format!("{timestamp}.{payload}");
    let expected = hmac_sha256_hex(secret, &signed_payload);

    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a signature header for a payload, as the provider would.
///
/// Used by tests and local tooling to produce verifiable deliveries.
#[must_use]
pub fn sign_payload(payload: &str, secret: &str, timestamp_epoch_seconds: i64) -> String {
    let signed_payload = format!("{timestamp_epoch_seconds}.{payload}");
    let signature = hmac_sha256_hex(secret, &signed_payload);
    format!("t={timestamp_epoch_seconds},v1={signature}")
}
