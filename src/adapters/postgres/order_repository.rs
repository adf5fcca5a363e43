//! PostgreSQL implementation of OrderRepository.
//!
//! Status transitions are single guarded UPDATEs. The WHERE clause pins
//! the expected prior state, so two racing webhook deliveries can never
//! both apply the same transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, OrderId, Timestamp};
use crate::domain::order::{Order, OrderStatus};
use crate::ports::{OrderRepository, TransitionOutcome};

pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguishes AlreadySettled from NotFound after a guarded update
    /// matched no rows.
    async fn outcome_for_missed_update(
        &self,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, DomainError> {
        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM orders WHERE payment_reference = $1")
                .bind(payment_reference)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    DomainError::new(
                        ErrorCode::DatabaseError,
                        format!("Failed to look up order: {}", e),
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
struct OrderRow {
    id: Uuid,
    payment_reference: String,
    status: String,
    amount_cents: i64,
    currency: String,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DomainError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status: OrderStatus = row.status.parse().map_err(|_| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid order status: {}", row.status),
            )
        })?;

        Ok(Order {
            id: OrderId::from_uuid(row.id),
            payment_reference: row.payment_reference,
            status,
            amount_cents: row.amount_cents,
            currency: row.currency,
            transaction_id: row.transaction_id,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn find_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<Order>, DomainError> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, payment_reference, status, amount_cents, currency,
                   transaction_id, created_at, updated_at
            FROM orders
            WHERE payment_reference = $1
            "#,
        )
        .bind(payment_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to find order: {}", e),
            )
        })?;

        row.map(Order::try_from).transpose()
    }

    async fn save(&self, order: &Order) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, payment_reference, status, amount_cents, currency,
                transaction_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.payment_reference)
        .bind(order.status.as_str())
        .bind(order.amount_cents)
        .bind(&order.currency)
        .bind(&order.transaction_id)
        .bind(order.created_at.as_datetime())
        .bind(order.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to save order: {}", e),
            )
        })?;

        Ok(())
    }

    async fn mark_paid(
        &self,
        payment_reference: &str,
        transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'paid', transaction_id = $2, updated_at = now()
            WHERE payment_reference = $1 AND status = 'pending'
            "#,
        )
        .bind(payment_reference)
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to mark order paid: {}", e),
            )
        })?;

        if result.rows_affected() == 1 {
            return Ok(TransitionOutcome::Applied);
        }
        self.outcome_for_missed_update(payment_reference).await
    }

    async fn mark_payment_failed(
        &self,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'payment_failed', updated_at = now()
            WHERE payment_reference = $1 AND status = 'pending'
            "#,
        )
        .bind(payment_reference)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to mark order failed: {}", e),
            )
        })?;

        if result.rows_affected() == 1 {
            return Ok(TransitionOutcome::Applied);
        }
        self.outcome_for_missed_update(payment_reference).await
    }

    async fn mark_refunded(
        &self,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'refunded', updated_at = now()
            WHERE payment_reference = $1 AND status = 'paid'
            "#,
        )
        .bind(payment_reference)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to mark order refunded: {}", e),
            )
        })?;

        if result.rows_affected() == 1 {
            return Ok(TransitionOutcome::Applied);
        }
        self.outcome_for_missed_update(payment_reference).await
    }
}
