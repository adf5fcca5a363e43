//! Webhook error types for Kashier webhook handling.
//!
//! Defines all error conditions that can occur during webhook processing,
//! with HTTP status code mapping and retryability semantics.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors that occur during webhook processing.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Caller exceeded its attempt budget for the current window.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u32 },

    /// A required webhook header was not supplied.
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// Webhook signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Webhook timestamp is older than the accepted tolerance window.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Event timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Failed to parse the webhook payload or a header value.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required field missing from webhook payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Referenced order could not be found.
    #[error("Order not found")]
    OrderNotFound,

    /// Referenced subscription could not be found.
    #[error("Subscription not found")]
    SubscriptionNotFound,

    /// Event was intentionally ignored (not an error condition).
    #[error("Event ignored: {0}")]
    Ignored(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl WebhookError {
    /// Returns true if the gateway should retry delivering this webhook.
    ///
    /// Retryable errors indicate temporary failures that may succeed on a
    /// later attempt (database issues, eventual consistency). Idempotent
    /// processing makes the retry itself safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::Database(_)
                // Might be eventual consistency between checkout and webhook
                | WebhookError::OrderNotFound
                | WebhookError::SubscriptionNotFound
        )
    }

    /// Maps the error to an appropriate HTTP status code.
    ///
    /// Status codes determine the gateway's retry behavior:
    /// - 2xx: Event acknowledged, no retry
    /// - 4xx: Client error, no retry
    /// - 429: Rate limited, retry after the window passes
    /// - 5xx: Server error, will retry
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // Auth failures - don't retry
            WebhookError::InvalidSignature | WebhookError::TimestampOutOfRange => {
                StatusCode::UNAUTHORIZED
            }

            // Invalid timestamp (future) - don't retry
            WebhookError::InvalidTimestamp => StatusCode::BAD_REQUEST,

            // Bad request - don't retry
            WebhookError::MissingHeader(_)
            | WebhookError::ParseError(_)
            | WebhookError::MissingField(_) => StatusCode::BAD_REQUEST,

            // Ignored events are acknowledged as success
            WebhookError::Ignored(_) => StatusCode::OK,

            // Server errors - will retry
            WebhookError::OrderNotFound
            | WebhookError::SubscriptionNotFound
            | WebhookError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the caller.
    ///
    /// The webhook endpoint is public; internal detail stays in the audit
    /// trail and server logs, never in the response body.
    pub fn public_message(&self) -> &'static str {
        match self {
            WebhookError::RateLimited { .. } => "Too many requests",
            WebhookError::MissingHeader(_) => "Missing signature headers",
            WebhookError::InvalidSignature
            | WebhookError::TimestampOutOfRange
            | WebhookError::InvalidTimestamp => "Signature verification failed",
            WebhookError::ParseError(_) | WebhookError::MissingField(_) => "Invalid payload",
            WebhookError::Ignored(_) => "Event acknowledged",
            WebhookError::OrderNotFound
            | WebhookError::SubscriptionNotFound
            | WebhookError::Database(_) => "Internal error",
        }
    }
}

impl From<crate::domain::foundation::DomainError> for WebhookError {
    fn from(err: crate::domain::foundation::DomainError) -> Self {
        WebhookError::Database(err.to_string())
    }
}
