//! Payment domain: Kashier webhook events, signature verification, and
//! the error taxonomy that drives webhook HTTP responses.

mod kashier_event;
mod webhook_errors;
mod webhook_verifier;

pub use kashier_event::{GatewayStatus, KashierEvent, KashierEventType};
pub use webhook_errors::WebhookError;
pub use webhook_verifier::KashierWebhookVerifier;
