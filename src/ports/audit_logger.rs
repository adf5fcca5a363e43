//! Audit logger port.
//!
//! Security-relevant webhook and rate-limit events go to an append-only
//! trail. Writing is best effort at the call site: an audit failure must
//! never change the HTTP response.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::domain::foundation::{AuditLogId, DomainError, Timestamp};

/// Categories of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    KashierWebhookApplied,
    KashierWebhookDuplicate,
    KashierWebhookIgnored,
    KashierWebhookRejected,
    KashierWebhookFailed,
    KashierWebhookRateLimited,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::KashierWebhookApplied => "kashier_webhook_applied",
            AuditEventType::KashierWebhookDuplicate => "kashier_webhook_duplicate",
            AuditEventType::KashierWebhookIgnored => "kashier_webhook_ignored",
            AuditEventType::KashierWebhookRejected => "kashier_webhook_rejected",
            AuditEventType::KashierWebhookFailed => "kashier_webhook_failed",
            AuditEventType::KashierWebhookRateLimited => "kashier_webhook_rate_limited",
        }
    }
}

/// One entry in the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: AuditLogId,
    pub event_type: AuditEventType,
    pub description: String,
    /// Who triggered the event: an admin identity, or None for the gateway.
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Value,
    pub created_at: Timestamp,
}

impl AuditLogEntry {
    pub fn new(event_type: AuditEventType, description: impl Into<String>) -> Self {
        Self {
            id: AuditLogId::new(),
            event_type,
            description: description.into(),
            actor: None,
            ip_address: None,
            metadata: Value::Object(Default::default()),
            created_at: Timestamp::now(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Port for the append-only audit trail.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn record(&self, entry: AuditLogEntry) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_fills_optional_fields() {
        let entry = AuditLogEntry::new(AuditEventType::KashierWebhookRateLimited, "window spent")
            .with_actor("admin:ops")
            .with_ip("10.0.0.1")
            .with_metadata(json!({"scope": "ip", "identifier": "203.0.113.9"}));

        assert_eq!(entry.actor.as_deref(), Some("admin:ops"));
        assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(entry.metadata["scope"], "ip");
    }

    #[test]
    fn event_types_have_stable_names() {
        assert_eq!(
            AuditEventType::KashierWebhookRateLimited.as_str(),
            "kashier_webhook_rate_limited"
        );
        assert_eq!(
            AuditEventType::KashierWebhookApplied.as_str(),
            "kashier_webhook_applied"
        );
    }
}
