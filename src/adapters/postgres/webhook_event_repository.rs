//! PostgreSQL implementation of WebhookEventRepository.
//!
//! Idempotency rides on the nullable unique dedup_key column: inserts use
//! ON CONFLICT DO NOTHING, so of two racing deliveries with the same key
//! exactly one row wins and the loser learns it lost from rows_affected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, WebhookEventId};
use crate::ports::{ProcessingStatus, SaveResult, WebhookEventRecord, WebhookEventRepository};

pub struct PostgresWebhookEventRepository {
    pool: PgPool,
}

impl PostgresWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    id: Uuid,
    source: String,
    event_type: String,
    dedup_key: Option<String>,
    raw_payload: String,
    signature: Option<String>,
    signature_verified: bool,
    source_ip: Option<String>,
    processing_status: String,
    error_message: Option<String>,
    received_at: DateTime<Utc>,
}

impl TryFrom<WebhookEventRow> for WebhookEventRecord {
    type Error = DomainError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        let processing_status: ProcessingStatus = row.processing_status.parse().map_err(|_| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid processing status: {}", row.processing_status),
            )
        })?;

        Ok(WebhookEventRecord {
            id: WebhookEventId::from_uuid(row.id),
            source: row.source,
            event_type: row.event_type,
            dedup_key: row.dedup_key,
            raw_payload: row.raw_payload,
            signature: row.signature,
            signature_verified: row.signature_verified,
            source_ip: row.source_ip,
            processing_status,
            error_message: row.error_message,
            received_at: Timestamp::from_datetime(row.received_at),
        })
    }
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn save(&self, record: &WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (
                id, source, event_type, dedup_key, raw_payload, signature,
                signature_verified, source_ip, processing_status, error_message, received_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.source)
        .bind(&record.event_type)
        .bind(&record.dedup_key)
        .bind(&record.raw_payload)
        .bind(&record.signature)
        .bind(record.signature_verified)
        .bind(&record.source_ip)
        .bind(record.processing_status.as_str())
        .bind(&record.error_message)
        .bind(record.received_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to save webhook event: {}", e),
            )
        })?;

        // NULL dedup_keys never conflict, so a zero here always means the
        // idempotency identity is already taken.
        if result.rows_affected() == 0 {
            Ok(SaveResult::AlreadyExists)
        } else {
            Ok(SaveResult::Inserted)
        }
    }

    async fn finalize(
        &self,
        id: WebhookEventId,
        status: ProcessingStatus,
        error_message: Option<String>,
    ) -> Result<(), DomainError> {
        // A failed row must not hold its dedup key: the gateway retries
        // 5xx responses, and the retry has to be able to claim the
        // identity and apply.
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processing_status = $2,
                error_message = $3,
                dedup_key = CASE WHEN $2 = 'failed' THEN NULL ELSE dedup_key END
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(&error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to finalize webhook event: {}", e),
            )
        })?;

        Ok(())
    }

    async fn find_by_dedup_key(
        &self,
        dedup_key: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        let row: Option<WebhookEventRow> = sqlx::query_as(
            r#"
            SELECT id, source, event_type, dedup_key, raw_payload, signature,
                   signature_verified, source_ip, processing_status, error_message, received_at
            FROM webhook_events
            WHERE dedup_key = $1
            "#,
        )
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to find webhook event: {}", e),
            )
        })?;

        row.map(WebhookEventRecord::try_from).transpose()
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM webhook_events WHERE received_at < $1")
            .bind(cutoff.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DomainError::new(
                    ErrorCode::DatabaseError,
                    format!("Failed to prune webhook events: {}", e),
                )
            })?;

        Ok(result.rows_affected())
    }
}
