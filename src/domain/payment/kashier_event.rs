//! Typed representation of Kashier webhook events.
//!
//! Raw webhook payloads are parsed into a `KashierEvent` only after
//! signature verification. A cheap `merchant_hint` pre-pass exists so the
//! verifier can pick the right tenant secret without trusting the payload.

use serde::Deserialize;

use super::webhook_errors::WebhookError;

/// Event types delivered by the Kashier gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KashierEventType {
    /// One-time payment result for an order.
    Pay,
    /// Recurring payment result for a subscription period.
    SubscriptionPay,
    /// Refund issued against an earlier payment.
    Refund,
    /// Event type we do not handle. Acknowledged and recorded, never retried.
    Unknown(String),
}

impl KashierEventType {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "pay" => KashierEventType::Pay,
            "subscription_pay" => KashierEventType::SubscriptionPay,
            "refund" => KashierEventType::Refund,
            other => KashierEventType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KashierEventType::Pay => "pay",
            KashierEventType::SubscriptionPay => "subscription_pay",
            KashierEventType::Refund => "refund",
            KashierEventType::Unknown(s) => s,
        }
    }
}

/// Outcome reported by the gateway for the attempted payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
}

impl GatewayStatus {
    /// Kashier reports status in several spellings depending on the
    /// payment method; normalize them here.
    fn from_wire(s: &str) -> Result<Self, WebhookError> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" | "PAID" | "CAPTURED" => Ok(GatewayStatus::Success),
            "FAILED" | "FAILURE" | "DECLINED" | "ERROR" => Ok(GatewayStatus::Failed),
            "PENDING" | "PROCESSING" => Ok(GatewayStatus::Pending),
            other => Err(WebhookError::ParseError(format!(
                "unrecognized gateway status: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Success => "SUCCESS",
            GatewayStatus::Failed => "FAILED",
            GatewayStatus::Pending => "PENDING",
        }
    }
}

/// Raw wire envelope. Field names follow Kashier's camelCase convention.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event: Option<String>,
    data: Option<RawData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawData {
    merchant_order_id: Option<String>,
    status: Option<String>,
    amount: Option<f64>,
    currency: Option<String>,
    method: Option<String>,
    transaction_id: Option<String>,
    merchant_id: Option<String>,
    customer_reference: Option<String>,
    card_token: Option<String>,
}

/// Minimal pre-verification view of the payload.
///
/// Extracted before the signature is checked, so nothing here may be
/// trusted for anything beyond secret selection.
#[derive(Debug, Deserialize)]
struct RawHint {
    data: Option<RawHintData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHintData {
    merchant_id: Option<String>,
}

/// A verified, parsed Kashier webhook event.
#[derive(Debug, Clone)]
pub struct KashierEvent {
    pub event_type: KashierEventType,
    pub payment_reference: String,
    pub status: GatewayStatus,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub method: Option<String>,
    pub transaction_id: Option<String>,
    pub merchant_id: Option<String>,
    pub customer_reference: Option<String>,
    pub card_token: Option<String>,
}

impl KashierEvent {
    /// Parses a raw webhook body into a typed event.
    ///
    /// Must only be called after signature verification. Unknown event
    /// types parse successfully (the orchestrator records and acknowledges
    /// them); missing required fields do not.
    pub fn from_payload(raw: &[u8]) -> Result<Self, WebhookError> {
        let envelope: RawEnvelope = serde_json::from_slice(raw)
            .map_err(|e| WebhookError::ParseError(format!("invalid webhook JSON: {e}")))?;

        let event = envelope.event.ok_or(WebhookError::MissingField("event"))?;
        let data = envelope.data.ok_or(WebhookError::MissingField("data"))?;

        let payment_reference = data
            .merchant_order_id
            .filter(|r| !r.is_empty())
            .ok_or(WebhookError::MissingField("data.merchantOrderId"))?;
        let status_raw = data.status.ok_or(WebhookError::MissingField("data.status"))?;

        Ok(KashierEvent {
            event_type: KashierEventType::from_wire(&event),
            payment_reference,
            status: GatewayStatus::from_wire(&status_raw)?,
            amount: data.amount,
            currency: data.currency,
            method: data.method,
            transaction_id: data.transaction_id,
            merchant_id: data.merchant_id,
            customer_reference: data.customer_reference,
            card_token: data.card_token,
        })
    }

    /// Extracts the merchant id without full parsing.
    ///
    /// Returns None when the body is not JSON or carries no merchant id;
    /// verification then falls back to the default tenant secret.
    pub fn merchant_hint(raw: &[u8]) -> Option<String> {
        serde_json::from_slice::<RawHint>(raw)
            .ok()
            .and_then(|h| h.data)
            .and_then(|d| d.merchant_id)
            .filter(|m| !m.is_empty())
    }

    /// Identity used to deduplicate gateway redeliveries.
    ///
    /// Two deliveries with the same type, reference, reported status, and
    /// transaction describe the same gateway fact and must be applied at
    /// most once. The transaction id keeps subscription renewals distinct
    /// across periods while redeliveries of one period still collide.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.event_type.as_str(),
            self.payment_reference,
            self.status.as_str(),
            self.transaction_id.as_deref().unwrap_or("-")
        )
    }
}
