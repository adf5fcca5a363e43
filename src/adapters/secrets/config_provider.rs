//! Config-backed webhook secret provider.
//!
//! Single-tenant deployments carry one merchant and one signing secret in
//! configuration. A multi-tenant deployment swaps this adapter for one
//! backed by a tenant store; the verification path does not change.

use secrecy::SecretString;

use crate::config::KashierConfig;
use crate::ports::WebhookSecretProvider;

pub struct ConfigSecretProvider {
    config: KashierConfig,
}

impl ConfigSecretProvider {
    pub fn new(config: KashierConfig) -> Self {
        Self { config }
    }
}

impl WebhookSecretProvider for ConfigSecretProvider {
    fn signing_secret(&self, merchant_id: Option<&str>) -> Option<SecretString> {
        match merchant_id {
            // No hint: the default (only) tenant signs.
            None => Some(self.config.webhook_secret.clone()),
            Some(m) if m == self.config.merchant_id => {
                Some(self.config.webhook_secret.clone())
            }
            // A hint naming someone else is not an error here; the caller
            // turns the missing secret into a failed verification.
            Some(_) => None,
        }
    }
}
