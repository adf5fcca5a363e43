//! HTTP handlers for the Kashier webhook endpoints.
//!
//! The HTTP layer only extracts: raw body bytes, signature and timestamp
//! headers (with legacy aliases), and the client IP. All decisions happen
//! in the application handler, which always yields a renderable outcome.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use crate::application::handlers::payment::{
    HandleKashierWebhook, WebhookDelivery, WebhookOutcome,
};
use crate::domain::foundation::Timestamp;

use super::dto::{LivenessResponse, WebhookAck};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for the payment webhook routes.
#[derive(Clone)]
pub struct PaymentAppState {
    pub webhook_handler: Arc<HandleKashierWebhook>,
}

impl PaymentAppState {
    pub fn new(webhook_handler: Arc<HandleKashierWebhook>) -> Self {
        Self { webhook_handler }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Header Extraction
// ════════════════════════════════════════════════════════════════════════════════

/// Reads a header by its canonical name, falling back to the legacy
/// "cashier" spelling some older gateway configurations still send.
fn header_with_alias(headers: &HeaderMap, canonical: &str, alias: &str) -> Option<String> {
    headers
        .get(canonical)
        .or_else(|| headers.get(alias))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Best-effort client IP: proxy headers first, socket address last.
fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return Some(real_ip.to_string());
        }
    }

    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

// ════════════════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// POST /payment/webhook
pub async fn handle_kashier_webhook(
    State(state): State<PaymentAppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(state, connect_info, headers, body, false).await
}

/// POST /payment/subscription/webhook
pub async fn handle_kashier_subscription_webhook(
    State(state): State<PaymentAppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(state, connect_info, headers, body, true).await
}

async fn dispatch(
    state: PaymentAppState,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
    via_subscription_endpoint: bool,
) -> Response {
    let delivery = WebhookDelivery {
        raw_body: body.to_vec(),
        signature: header_with_alias(&headers, "x-kashier-signature", "x-cashier-signature"),
        timestamp: header_with_alias(&headers, "x-kashier-timestamp", "x-cashier-timestamp"),
        source_ip: client_ip(&headers, connect_info.as_ref()),
        via_subscription_endpoint,
    };

    let outcome = state.webhook_handler.handle(delivery).await;
    render(outcome)
}

/// GET on the webhook paths: liveness for gateway configuration checks.
pub async fn webhook_liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        message: "Kashier webhook endpoint is reachable",
        timestamp: Timestamp::now().to_string(),
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// Response Rendering
// ════════════════════════════════════════════════════════════════════════════════

fn render(outcome: WebhookOutcome) -> Response {
    let mut response = (
        outcome.status,
        Json(WebhookAck {
            message: outcome.message,
        }),
    )
        .into_response();

    let headers = response.headers_mut();

    if let Some(budget) = outcome.rate_limit {
        insert_numeric(headers, "x-ratelimit-limit", budget.limit as u64);
        insert_numeric(headers, "x-ratelimit-remaining", budget.remaining as u64);
        insert_numeric(headers, "x-ratelimit-reset", budget.reset_secs as u64);
    }

    if outcome.status == StatusCode::TOO_MANY_REQUESTS {
        let retry = outcome.retry_after_secs.unwrap_or(1).max(1);
        insert_numeric(headers, header::RETRY_AFTER.as_str(), retry as u64);
    }

    response
}

fn insert_numeric(headers: &mut HeaderMap, name: &str, value: u64) {
    if let (Ok(name), Ok(value)) = (
        name.parse::<header::HeaderName>(),
        HeaderValue::from_str(&value.to_string()),
    ) {
        headers.insert(name, value);
    }
}
