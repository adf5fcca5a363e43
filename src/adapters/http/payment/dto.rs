//! Wire types for the payment webhook endpoints.

use serde::Serialize;

/// Body of every webhook response, success or failure.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub message: String,
}

/// Body of the GET liveness check on the webhook paths.
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: String,
}
