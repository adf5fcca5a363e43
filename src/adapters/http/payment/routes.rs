//! Axum router for the payment webhook endpoints.
//!
//! # Routes
//!
//! Webhooks carry no user auth; the signature check is the auth.
//! - `POST /webhook` - one-time payment events
//! - `POST /subscription/webhook` - recurring payment events
//! - `GET` on both paths - liveness for gateway configuration checks

use axum::routing::get;
use axum::Router;

use super::handlers::{
    handle_kashier_subscription_webhook, handle_kashier_webhook, webhook_liveness,
    PaymentAppState,
};

/// Create the payment webhook router. Mounted under `/payment`.
pub fn payment_routes() -> Router<PaymentAppState> {
    Router::new()
        .route(
            "/webhook",
            get(webhook_liveness).post(handle_kashier_webhook),
        )
        .route(
            "/subscription/webhook",
            get(webhook_liveness).post(handle_kashier_subscription_webhook),
        )
}
