//! Best-effort wrapper around an AuditLogger.
//!
//! Webhook processing must answer the gateway even when the audit store
//! is down. This wrapper retries once, then drops to the fallback sink:
//! the entry is serialized into a structured warn log so the trail can be
//! reconstructed from log storage. `record` never returns an error.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::foundation::DomainError;
use crate::ports::{AuditLogEntry, AuditLogger};

pub struct BestEffortAuditLogger {
    inner: Arc<dyn AuditLogger>,
}

impl BestEffortAuditLogger {
    pub fn new(inner: Arc<dyn AuditLogger>) -> Self {
        Self { inner }
    }

    fn fall_back(entry: &AuditLogEntry, err: &DomainError) {
        let serialized = serde_json::to_string(entry)
            .unwrap_or_else(|_| format!("{:?}", entry));
        tracing::warn!(
            error = %err,
            audit_entry = %serialized,
            "audit store unavailable, entry diverted to log sink"
        );
    }
}

#[async_trait]
impl AuditLogger for BestEffortAuditLogger {
    async fn record(&self, entry: AuditLogEntry) -> Result<(), DomainError> {
        match self.inner.record(entry.clone()).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::debug!(error = %first, "audit write failed, retrying once");
                if let Err(second) = self.inner.record(entry.clone()).await {
                    Self::fall_back(&entry, &second);
                }
                Ok(())
            }
        }
    }
}
