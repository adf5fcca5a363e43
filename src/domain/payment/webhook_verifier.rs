//! Kashier webhook signature verification.
//!
//! Kashier signs each delivery with HMAC-SHA256 over `{timestamp}.{body}`
//! and sends the hex digest plus the unix timestamp in headers. Both the
//! timestamp window and the digest must check out before the payload is
//! parsed or trusted.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::webhook_errors::WebhookError;
use crate::domain::foundation::Timestamp;

type HmacSha256 = Hmac<Sha256>;

/// How far into the future a timestamp may sit before rejection.
/// Covers ordinary clock drift between the gateway and our hosts.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Verifies Kashier webhook signatures and timestamp freshness.
///
/// The signing secret is supplied per call, since different tenants sign
/// with different secrets.
#[derive(Debug, Clone)]
pub struct KashierWebhookVerifier {
    tolerance_secs: i64,
}

impl KashierWebhookVerifier {
    /// Creates a verifier accepting timestamps up to `tolerance_secs` old.
    pub fn new(tolerance_secs: u64) -> Self {
        Self {
            tolerance_secs: tolerance_secs as i64,
        }
    }

    /// Verifies the signature and timestamp of a webhook delivery.
    ///
    /// The raw body bytes must be exactly as received; any re-serialization
    /// breaks the digest.
    pub fn verify(
        &self,
        secret: &SecretString,
        signature: &str,
        timestamp: &str,
        payload: &[u8],
    ) -> Result<(), WebhookError> {
        let event_secs = self.validate_timestamp(timestamp)?;

        let provided = hex::decode(signature.trim())
            .map_err(|_| WebhookError::ParseError("signature is not valid hex".to_string()))?;

        let expected = Self::compute(secret, event_secs, payload);

        // Constant-time compare so timing never leaks digest prefixes.
        if expected.ct_eq(&provided).into() {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        }
    }

    /// Parses the timestamp header and enforces the freshness window.
    fn validate_timestamp(&self, timestamp: &str) -> Result<i64, WebhookError> {
        let event_secs: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| WebhookError::ParseError("timestamp is not an integer".to_string()))?;

        if event_secs < 0 {
            return Err(WebhookError::ParseError(
                "timestamp is negative".to_string(),
            ));
        }

        let now_secs = Timestamp::now().as_unix_secs() as i64;

        if event_secs > now_secs + MAX_CLOCK_SKEW_SECS {
            return Err(WebhookError::InvalidTimestamp);
        }
        if now_secs - event_secs > self.tolerance_secs {
            return Err(WebhookError::TimestampOutOfRange);
        }

        Ok(event_secs)
    }

    fn compute(secret: &SecretString, timestamp_secs: i64, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(timestamp_secs.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    /// Produces the hex signature Kashier would send for this delivery.
    ///
    /// Exists for tests and for the webhook simulator in development mode.
    pub fn sign(secret: &SecretString, timestamp_secs: i64, payload: &[u8]) -> String {
        hex::encode(Self::compute(secret, timestamp_secs, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secret() -> SecretString {
        SecretString::new("whsec_test_secret_key".to_string())
    }

    fn now_secs() -> i64 {
        Timestamp::now().as_unix_secs() as i64
    }

    // ══════════════════════════════════════════════════════════════
    // Signature Verification Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn accepts_valid_signature() {
        let verifier = KashierWebhookVerifier::new(300);
        let payload = br#"{"event":"pay","data":{"merchantOrderId":"ORD-1","status":"SUCCESS"}}"#;
        let ts = now_secs();
        let sig = KashierWebhookVerifier::sign(&secret(), ts, payload);

        assert!(verifier
            .verify(&secret(), &sig, &ts.to_string(), payload)
            .is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = KashierWebhookVerifier::new(300);
        let payload = b"{}";
        let ts = now_secs();
        let sig = KashierWebhookVerifier::sign(&secret(), ts, payload);
        let other = SecretString::new("whsec_other".to_string());

        let err = verifier
            .verify(&other, &sig, &ts.to_string(), payload)
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[test]
    fn rejects_tampered_payload() {
        let verifier = KashierWebhookVerifier::new(300);
        let ts = now_secs();
        let sig = KashierWebhookVerifier::sign(&secret(), ts, b"original body");

        let err = verifier
            .verify(&secret(), &sig, &ts.to_string(), b"tampered body")
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[test]
    fn rejects_signature_for_different_timestamp() {
        let verifier = KashierWebhookVerifier::new(300);
        let payload = b"{}";
        let ts = now_secs();
        let sig = KashierWebhookVerifier::sign(&secret(), ts - 10, payload);

        // Header says `ts` but digest was computed over `ts - 10`.
        let err = verifier
            .verify(&secret(), &sig, &ts.to_string(), payload)
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[test]
    fn rejects_non_hex_signature() {
        let verifier = KashierWebhookVerifier::new(300);
        let err = verifier
            .verify(&secret(), "not-hex!!", &now_secs().to_string(), b"{}")
            .unwrap_err();
        assert!(matches!(err, WebhookError::ParseError(_)));
    }

    #[test]
    fn tolerates_surrounding_whitespace_in_signature() {
        let verifier = KashierWebhookVerifier::new(300);
        let payload = b"{}";
        let ts = now_secs();
        let sig = format!("  {}  ", KashierWebhookVerifier::sign(&secret(), ts, payload));

        assert!(verifier
            .verify(&secret(), &sig, &ts.to_string(), payload)
            .is_ok());
    }

    // ══════════════════════════════════════════════════════════════
    // Timestamp Window Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn rejects_stale_timestamp() {
        let verifier = KashierWebhookVerifier::new(300);
        let payload = b"{}";
        let ts = now_secs() - 301;
        let sig = KashierWebhookVerifier::sign(&secret(), ts, payload);

        let err = verifier
            .verify(&secret(), &sig, &ts.to_string(), payload)
            .unwrap_err();
        assert!(matches!(err, WebhookError::TimestampOutOfRange));
    }

    #[test]
    fn accepts_timestamp_at_tolerance_edge() {
        let verifier = KashierWebhookVerifier::new(300);
        let payload = b"{}";
        let ts = now_secs() - 299;
        let sig = KashierWebhookVerifier::sign(&secret(), ts, payload);

        assert!(verifier
            .verify(&secret(), &sig, &ts.to_string(), payload)
            .is_ok());
    }

    #[test]
    fn rejects_far_future_timestamp() {
        let verifier = KashierWebhookVerifier::new(300);
        let payload = b"{}";
        let ts = now_secs() + 120;
        let sig = KashierWebhookVerifier::sign(&secret(), ts, payload);

        let err = verifier
            .verify(&secret(), &sig, &ts.to_string(), payload)
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidTimestamp));
    }

    #[test]
    fn accepts_slight_clock_skew() {
        let verifier = KashierWebhookVerifier::new(300);
        let payload = b"{}";
        let ts = now_secs() + 30;
        let sig = KashierWebhookVerifier::sign(&secret(), ts, payload);

        assert!(verifier
            .verify(&secret(), &sig, &ts.to_string(), payload)
            .is_ok());
    }

    #[test]
    fn rejects_garbage_timestamp() {
        let verifier = KashierWebhookVerifier::new(300);
        for bad in ["", "abc", "12.5", "-100"] {
            let err = verifier
                .verify(&secret(), "00", bad, b"{}")
                .unwrap_err();
            assert!(matches!(err, WebhookError::ParseError(_)), "input: {bad:?}");
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Property Tests
    // ══════════════════════════════════════════════════════════════

    proptest! {
        #[test]
        fn any_signed_body_round_trips(body in proptest::collection::vec(any::<u8>(), 0..512)) {
            let verifier = KashierWebhookVerifier::new(300);
            let ts = now_secs();
            let sig = KashierWebhookVerifier::sign(&secret(), ts, &body);
            prop_assert!(verifier.verify(&secret(), &sig, &ts.to_string(), &body).is_ok());
        }

        #[test]
        fn flipping_any_payload_byte_invalidates(
            body in proptest::collection::vec(any::<u8>(), 1..256),
            idx in 0usize..256,
        ) {
            let verifier = KashierWebhookVerifier::new(300);
            let ts = now_secs();
            let sig = KashierWebhookVerifier::sign(&secret(), ts, &body);

            let mut mutated = body.clone();
            let i = idx % mutated.len();
            mutated[i] ^= 0xFF;

            prop_assert!(verifier.verify(&secret(), &sig, &ts.to_string(), &mutated).is_err());
        }
    }
}
