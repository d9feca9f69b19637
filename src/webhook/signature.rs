//! Webhook body signatures: hex-encoded HMAC-SHA256 over the raw bytes.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    Missing,
    Malformed,
    Mismatch,
}

// HMAC takes keys of any length; the error arm is unreachable in practice.
fn keyed(secret: &str, body: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac)
}

/// Hex signature of `body` under `secret`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    keyed(secret, body)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Check `provided` (hex, optionally `sha256=` prefixed) against the body.
/// The comparison is constant time.
pub fn verify_signature(secret: &str, body: &[u8], provided: Option<&str>) -> Result<(), SignatureError> {
    let provided = provided.map(str::trim).filter(|s| !s.is_empty()).ok_or(SignatureError::Missing)?;
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let sig_bytes = hex::decode(provided).map_err(|_| SignatureError::Malformed)?;

    keyed(secret, body)
        .ok_or(SignatureError::Mismatch)?
        .verify_slice(&sig_bytes)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"event":"charge.success"}"#;

    #[test]
    fn test_valid_signature_accepted() {
        let sig = compute_signature("secret", BODY);
        assert_eq!(verify_signature("secret", BODY, Some(&sig)), Ok(()));
        let prefixed = format!("sha256={}", sig);
        assert_eq!(verify_signature("secret", BODY, Some(&prefixed)), Ok(()));
    }

    #[test]
    fn test_missing_and_malformed() {
        assert_eq!(verify_signature("secret", BODY, None), Err(SignatureError::Missing));
        assert_eq!(verify_signature("secret", BODY, Some("  ")), Err(SignatureError::Missing));
        assert_eq!(
            verify_signature("secret", BODY, Some("not-hex")),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn test_tampered_body_or_wrong_secret() {
        let sig = compute_signature("secret", BODY);
        assert_eq!(
            verify_signature("secret", br#"{"event":"charge.failed"}"#, Some(&sig)),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature("other", BODY, Some(&sig)),
            Err(SignatureError::Mismatch)
        );
        // truncated signature
        assert_eq!(
            verify_signature("secret", BODY, Some(&sig[..32])),
            Err(SignatureError::Mismatch)
        );
    }
}
