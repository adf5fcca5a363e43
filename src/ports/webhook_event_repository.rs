//! Webhook event repository port.
//!
//! Every inbound gateway call gets a row, verified or not. The nullable
//! unique `dedup_key` carries the idempotency guarantee: the orchestrator
//! inserts the row with the key BEFORE applying the transition, so of two
//! racing deliveries exactly one save reports `Inserted` and only that one
//! may mutate order state. The loser sees `AlreadyExists`.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, WebhookEventId};

/// Terminal processing state recorded for an inbound webhook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    /// Verified event whose status transition was applied.
    Applied,
    /// Verified event that matched an earlier delivery; nothing mutated.
    Duplicate,
    /// Verified event of a type we do not handle; acknowledged only.
    Ignored,
    /// Call rejected before or during verification.
    Rejected,
    /// Verified event whose processing failed; gateway will retry.
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Applied => "applied",
            ProcessingStatus::Duplicate => "duplicate",
            ProcessingStatus::Ignored => "ignored",
            ProcessingStatus::Rejected => "rejected",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(ProcessingStatus::Applied),
            "duplicate" => Ok(ProcessingStatus::Duplicate),
            "ignored" => Ok(ProcessingStatus::Ignored),
            "rejected" => Ok(ProcessingStatus::Rejected),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(DomainError::new(
                ErrorCode::InvalidFormat,
                format!("Unknown processing status: {other}"),
            )),
        }
    }
}

/// Stored record of one inbound webhook call.
#[derive(Debug, Clone)]
pub struct WebhookEventRecord {
    pub id: WebhookEventId,
    /// Gateway that sent the call, e.g. "kashier".
    pub source: String,
    /// Wire event type, or "unknown" when the payload never parsed.
    pub event_type: String,
    /// Idempotency identity, claimed at insert time for verified, parsed
    /// events. None for rejected and duplicate-call rows; a `Failed`
    /// finalization clears it again so the identity is never consumed by
    /// a call that did not apply and gateway retries can still succeed.
    pub dedup_key: Option<String>,
    pub raw_payload: String,
    pub signature: Option<String>,
    pub signature_verified: bool,
    pub source_ip: Option<String>,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub received_at: Timestamp,
}

/// Result of persisting a webhook event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    Inserted,
    /// A record with the same dedup_key already exists.
    AlreadyExists,
}

/// Port for the append-only webhook event store.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Persists the record. Rows are never rewritten afterwards except
    /// through `finalize`.
    async fn save(&self, record: &WebhookEventRecord) -> Result<SaveResult, DomainError>;

    /// Settles the processing status of a row saved before its transition
    /// ran. Finalizing as `Failed` also releases the row's dedup key, so a
    /// gateway retry of the same event can claim it again.
    async fn finalize(
        &self,
        id: WebhookEventId,
        status: ProcessingStatus,
        error_message: Option<String>,
    ) -> Result<(), DomainError>;

    /// Looks up a prior delivery by idempotency identity.
    async fn find_by_dedup_key(
        &self,
        dedup_key: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError>;

    /// Deletes records received before the cutoff. Returns rows removed.
    /// Used by the retention sweep, never by request handling.
    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
