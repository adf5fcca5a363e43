//! PostgreSQL implementation of AuditLogger.
//!
//! Insert-only. The table has no UPDATE or DELETE path in this codebase.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{AuditLogEntry, AuditLogger};

pub struct PostgresAuditLogger {
    pool: PgPool,
}

impl PostgresAuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogger for PostgresAuditLogger {
    async fn record(&self, entry: AuditLogEntry) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, event_type, description, actor, ip_address, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.event_type.as_str())
        .bind(&entry.description)
        .bind(&entry.actor)
        .bind(&entry.ip_address)
        .bind(&entry.metadata)
        .bind(entry.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to write audit entry: {}", e),
            )
        })?;

        Ok(())
    }
}
