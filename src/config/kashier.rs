//! Kashier gateway configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

/// Kashier payment gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KashierConfig {
    /// Merchant account identifier (MID-xxxx-xxxx)
    pub merchant_id: String,

    /// Webhook signing secret shared with the gateway
    pub webhook_secret: SecretString,

    /// Maximum accepted age of a webhook timestamp, in seconds
    #[serde(default = "default_timestamp_tolerance")]
    pub timestamp_tolerance_secs: u64,
}

impl KashierConfig {
    /// Check if using a Kashier test-mode merchant account
    pub fn is_test_mode(&self) -> bool {
        self.merchant_id.starts_with("MID-TEST-")
    }

    /// Validate Kashier configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.merchant_id.is_empty() {
            return Err(ValidationError::MissingRequired("KASHIER_MERCHANT_ID"));
        }
        if !self.merchant_id.starts_with("MID-") {
            return Err(ValidationError::InvalidMerchantId);
        }
        if self.webhook_secret.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("KASHIER_WEBHOOK_SECRET"));
        }
        // Zero disables replay protection; an hour makes it meaningless.
        if self.timestamp_tolerance_secs == 0 || self.timestamp_tolerance_secs > 3600 {
            return Err(ValidationError::InvalidTimestampTolerance);
        }
        Ok(())
    }
}

fn default_timestamp_tolerance() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(merchant_id: &str, secret: &str) -> KashierConfig {
        KashierConfig {
            merchant_id: merchant_id.to_string(),
            webhook_secret: SecretString::new(secret.to_string()),
            timestamp_tolerance_secs: default_timestamp_tolerance(),
        }
    }

    #[test]
    fn test_is_test_mode() {
        assert!(config("MID-TEST-123", "secret").is_test_mode());
        assert!(!config("MID-29042-456", "secret").is_test_mode());
    }

    #[test]
    fn test_validation_missing_merchant_id() {
        assert!(config("", "secret").validate().is_err());
    }

    #[test]
    fn test_validation_invalid_merchant_prefix() {
        assert!(config("ACCT-123", "secret").validate().is_err());
    }

    #[test]
    fn test_validation_missing_secret() {
        assert!(config("MID-29042-456", "").validate().is_err());
    }

    #[test]
    fn test_validation_invalid_tolerance() {
        let mut cfg = config("MID-29042-456", "secret");
        cfg.timestamp_tolerance_secs = 0;
        assert!(cfg.validate().is_err());
        cfg.timestamp_tolerance_secs = 7200;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(config("MID-29042-456", "ksh_secret_xyz").validate().is_ok());
    }
}
