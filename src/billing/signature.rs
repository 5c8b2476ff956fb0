//! Webhook signature verification.
//!
//! The provider signs the RAW request body: the header carries a unix
//! timestamp `t` and one or more `v1` signatures, each an HMAC-SHA256 of
//! `"{t}.{body}"` under the shared endpoint secret. Verification must run
//! before the body is parsed, and the comparison is constant-time (the
//! `Mac::verify_slice` contract).

use crate::db::now_timestamp;
use crate::error::{AppError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Default acceptance window for the signed timestamp, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verify `header` against `body` and the endpoint `secret`.
///
/// Rejects when the header is malformed, the timestamp is outside the
/// tolerance window, or no `v1` candidate matches.
pub fn verify(secret: &str, header: &str, body: &[u8], tolerance_secs: i64) -> Result<()> {
    verify_at(secret, header, body, tolerance_secs, now_timestamp())
}

fn verify_at(secret: &str, header: &str, body: &[u8], tolerance_secs: i64, now: i64) -> Result<()> {
    if secret.is_empty() {
        return Err(AppError::SignatureVerification(
            "No webhook secret configured".to_string(),
        ));
    }

    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        AppError::SignatureVerification("Missing timestamp in signature header".to_string())
    })?;

    if (now - timestamp).abs() > tolerance_secs {
        return Err(AppError::SignatureVerification(
            "Signature timestamp outside tolerance".to_string(),
        ));
    }

    if candidates.is_empty() {
        return Err(AppError::SignatureVerification(
            "No v1 signature in header".to_string(),
        ));
    }

    for candidate in &candidates {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Internal(format!("HMAC init failed: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);

        if mac.verify_slice(candidate).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::SignatureVerification(
        "Signature mismatch".to_string(),
    ))
}

/// Produce a signature header for `body` at `timestamp`.
#[cfg(test)]
pub fn sign(secret: &str, body: &[u8], timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    format!("t={},v1={}", timestamp, hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    #[test]
    fn accepts_valid_signature() {
        let header = sign(SECRET, BODY, 1_700_000_000);
        verify_at(SECRET, &header, BODY, DEFAULT_TOLERANCE_SECS, 1_700_000_010).unwrap();
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign(SECRET, BODY, 1_700_000_000);
        let err = verify_at(
            SECRET,
            &header,
            br#"{"id":"evt_1","type":"customer.subscription.deleted"}"#,
            DEFAULT_TOLERANCE_SECS,
            1_700_000_010,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::SignatureVerification(_)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign("whsec_other", BODY, 1_700_000_000);
        assert!(verify_at(SECRET, &header, BODY, DEFAULT_TOLERANCE_SECS, 1_700_000_010).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign(SECRET, BODY, 1_700_000_000);
        let err = verify_at(SECRET, &header, BODY, DEFAULT_TOLERANCE_SECS, 1_700_009_999)
            .unwrap_err();
        assert!(matches!(err, AppError::SignatureVerification(_)));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(verify_at(SECRET, "nonsense", BODY, DEFAULT_TOLERANCE_SECS, 0).is_err());
        assert!(verify_at(SECRET, "t=abc,v1=zz", BODY, DEFAULT_TOLERANCE_SECS, 0).is_err());
    }

    #[test]
    fn accepts_any_matching_candidate_among_several() {
        let good = sign(SECRET, BODY, 1_700_000_000);
        let v1 = good.split("v1=").nth(1).unwrap();
        let header = format!("t=1700000000,v1={},v1={}", "ab".repeat(32), v1);
        verify_at(SECRET, &header, BODY, DEFAULT_TOLERANCE_SECS, 1_700_000_010).unwrap();
    }
}
