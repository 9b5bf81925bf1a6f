//! Delivery webhook signature verification.
//!
//! The provider signs webhooks the Svix way. The signed content is
//! `"{svix-id}.{svix-timestamp}.{raw body}"`, the key is the base64 part of a
//! `whsec_…` secret, and `svix-signature` carries one or more space separated
//! `v1,<base64 HMAC-SHA256>` entries (several during secret rotation).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const ID_HEADER: &str = "svix-id";
pub const TIMESTAMP_HEADER: &str = "svix-timestamp";
pub const SIGNATURE_HEADER: &str = "svix-signature";

const SECRET_PREFIX: &str = "whsec_";
const VERSION: &str = "v1";

fn signing_key(secret: &str) -> Option<Vec<u8>> {
    let encoded = secret.trim();
    let encoded = encoded.strip_prefix(SECRET_PREFIX).unwrap_or(encoded);
    BASE64.decode(encoded).ok()
}

/// `v1,<base64>` signature of a message, as the provider would send it.
pub fn sign_payload(secret: &str, msg_id: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let key = signing_key(secret)?;
    let mut mac = HmacSha256::new_from_slice(&key).ok()?;
    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(format!(
        "{VERSION},{}",
        BASE64.encode(mac.finalize().into_bytes())
    ))
}

/// Verify a webhook, rejecting timestamps more than `max_age_seconds` away
/// from now in either direction.
pub fn verify_webhook_signature(
    secret: &str,
    msg_id: &str,
    timestamp: &str,
    body: &[u8],
    signatures: &str,
    max_age_seconds: u64,
) -> bool {
    if secret.is_empty() || msg_id.is_empty() || timestamp.is_empty() || signatures.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_id = !msg_id.is_empty(),
            has_timestamp = !timestamp.is_empty(),
            has_signature = !signatures.is_empty(),
            "webhook_signature_missing_fields"
        );
        return false;
    }

    let sent_at: u64 = match timestamp.parse() {
        Ok(t) => t,
        Err(_) => {
            warn!(timestamp = %timestamp, "webhook_signature_invalid_timestamp");
            return false;
        }
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let age = now.abs_diff(sent_at);
    if age > max_age_seconds {
        warn!(
            sent_at = sent_at,
            now = now,
            age_seconds = age,
            max_age_seconds = max_age_seconds,
            "webhook_signature_stale"
        );
        return false;
    }

    let Some(expected) = sign_payload(secret, msg_id, timestamp, body) else {
        warn!("webhook_signature_invalid_key");
        return false;
    };

    let valid = signatures
        .split_whitespace()
        .filter(|entry| entry.starts_with("v1,"))
        .any(|entry| constant_time_compare(entry, &expected));
    if !valid {
        warn!(
            msg_id = %msg_id,
            candidates = signatures.split_whitespace().count(),
            "webhook_signature_mismatch"
        );
    }
    valid
}

/// Constant-time string comparison.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Whether a configured secret is usable.
pub fn is_configured(secret: &Option<String>) -> bool {
    secret
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

    fn now() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string()
    }

    #[test]
    fn test_known_signature() {
        let sig = sign_payload(
            SECRET,
            "msg_p5jXN8AQM9LWM0D4loKWxJek",
            "1614265330",
            br#"{"test": 2432232314}"#,
        )
        .unwrap();
        assert_eq!(sig, "v1,g0hM9SsE+OTPJTGt/tmIKtSyZlE3uFJELVlNIOLJ1OE=");
    }

    #[test]
    fn test_secret_prefix_optional() {
        let bare = SECRET.trim_start_matches("whsec_");
        assert_eq!(
            sign_payload(bare, "msg_1", "1", b"{}"),
            sign_payload(SECRET, "msg_1", "1", b"{}")
        );
        assert!(sign_payload("whsec_not base64!", "msg_1", "1", b"{}").is_none());
    }

    #[test]
    fn test_missing_fields() {
        assert!(!verify_webhook_signature("", "msg_1", "123", b"{}", "v1,x", 300));
        assert!(!verify_webhook_signature(SECRET, "", "123", b"{}", "v1,x", 300));
        assert!(!verify_webhook_signature(SECRET, "msg_1", "", b"{}", "v1,x", 300));
        assert!(!verify_webhook_signature(SECRET, "msg_1", "123", b"{}", "", 300));
    }

    #[test]
    fn test_invalid_timestamp() {
        assert!(!verify_webhook_signature(SECRET, "msg_1", "yesterday", b"{}", "v1,x", 300));
    }

    #[test]
    fn test_stale_timestamp() {
        let sig = sign_payload(SECRET, "msg_1", "946684800", b"{}").unwrap();
        assert!(!verify_webhook_signature(SECRET, "msg_1", "946684800", b"{}", &sig, 300));
    }

    #[test]
    fn test_valid_signature_among_several() {
        let ts = now();
        let body = br#"{"type":"email.bounced"}"#;
        let sig = sign_payload(SECRET, "msg_1", &ts, body).unwrap();
        assert!(verify_webhook_signature(SECRET, "msg_1", &ts, body, &sig, 300));

        let rotated = format!("v1,b2xkLXNpZ25hdHVyZQ== {sig}");
        assert!(verify_webhook_signature(SECRET, "msg_1", &ts, body, &rotated, 300));
    }

    #[test]
    fn test_tampered_message_rejected() {
        let ts = now();
        let sig = sign_payload(SECRET, "msg_1", &ts, b"original").unwrap();
        assert!(!verify_webhook_signature(SECRET, "msg_1", &ts, b"tampered", &sig, 300));
        assert!(!verify_webhook_signature(SECRET, "msg_2", &ts, b"original", &sig, 300));

        let other = sign_payload("whsec_c2VjcmV0", "msg_1", &ts, b"original").unwrap();
        assert!(!verify_webhook_signature(SECRET, "msg_1", &ts, b"original", &other, 300));

        let unversioned = sig.trim_start_matches("v1,");
        assert!(!verify_webhook_signature(SECRET, "msg_1", &ts, b"original", unversioned, 300));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_is_configured() {
        assert!(!is_configured(&None));
        assert!(!is_configured(&Some("".to_string())));
        assert!(!is_configured(&Some("   ".to_string())));
        assert!(is_configured(&Some("secret".to_string())));
    }
}
