//! PostgreSQL implementation of SubscriptionRepository.
//!
//! Same guarded-update discipline as the order repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::ports::{SubscriptionRepository, TransitionOutcome};

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn outcome_for_missed_update(
        &self,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, DomainError> {
        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM subscriptions WHERE payment_reference = $1")
                .bind(payment_reference)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    DomainError::new(
                        ErrorCode::DatabaseError,
                        format!("Failed to look up subscription: {}", e),
                    )
                })?;

        Ok(if exists.is_some() {
            TransitionOutcome::AlreadySettled
        } else {
            TransitionOutcome::NotFound
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    payment_reference: String,
    status: String,
    current_period_end: Option<DateTime<Utc>>,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status: SubscriptionStatus = row.status.parse().map_err(|_| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid subscription status: {}", row.status),
            )
        })?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            payment_reference: row.payment_reference,
            status,
            current_period_end: row.current_period_end.map(Timestamp::from_datetime),
            transaction_id: row.transaction_id,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, payment_reference, status, current_period_end,
                   transaction_id, created_at, updated_at
            FROM subscriptions
            WHERE payment_reference = $1
            "#,
        )
        .bind(payment_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to find subscription: {}", e),
            )
        })?;

        row.map(Subscription::try_from).transpose()
    }

    async fn save(&self, subscription: &Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, payment_reference, status, current_period_end,
                transaction_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(&subscription.payment_reference)
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_end.map(|t| *t.as_datetime()))
        .bind(&subscription.transaction_id)
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to save subscription: {}", e),
            )
        })?;

        Ok(())
    }

    async fn activate(
        &self,
        payment_reference: &str,
        transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, DomainError> {
        let period_end = Subscription::next_period_end();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active', transaction_id = $2,
                current_period_end = $3, updated_at = now()
            WHERE payment_reference = $1
              AND status IN ('pending', 'active', 'past_due')
            "#,
        )
        .bind(payment_reference)
        .bind(transaction_id)
        .bind(period_end.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to activate subscription: {}", e),
            )
        })?;

        if result.rows_affected() == 1 {
            return Ok(TransitionOutcome::Applied);
        }
        self.outcome_for_missed_update(payment_reference).await
    }

    async fn mark_past_due(
        &self,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'past_due', updated_at = now()
            WHERE payment_reference = $1
              AND status IN ('pending', 'active')
            "#,
        )
        .bind(payment_reference)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to mark subscription past due: {}", e),
            )
        })?;

        if result.rows_affected() == 1 {
            return Ok(TransitionOutcome::Applied);
        }
        self.outcome_for_missed_update(payment_reference).await
    }
}
