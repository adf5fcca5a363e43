//! Payment webhook application handlers.

mod handle_kashier_webhook;

pub use handle_kashier_webhook::{HandleKashierWebhook, WebhookDelivery, WebhookOutcome};
