//! Webhook signing secret lookup.

use secrecy::SecretString;

/// Resolves the HMAC signing secret for a tenant.
///
/// The merchant id hint comes from the unverified payload, so a wrong or
/// hostile hint must only ever yield the wrong secret (and thus a failed
/// verification), never a panic or a bypass.
pub trait WebhookSecretProvider: Send + Sync {
    /// Returns the signing secret for the given merchant, or the default
    /// tenant secret when no hint is present. None means the merchant is
    /// not recognized; verification then fails.
    fn signing_secret(&self, merchant_id: Option<&str>) -> Option<SecretString>;
}
