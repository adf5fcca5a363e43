//! Order repository port.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::order::Order;

/// Outcome of a conditional status transition.
///
/// Transitions run as a single guarded update so two racing deliveries
/// cannot both apply; exactly one sees `Applied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row matched the expected prior state and was updated.
    Applied,
    /// The row exists but already left the prior state. No mutation.
    AlreadySettled,
    /// No row carries this payment reference.
    NotFound,
}

/// Port for order persistence.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<Order>, DomainError>;

    /// Inserts a new order. Used by checkout, not by webhook handling.
    async fn save(&self, order: &Order) -> Result<(), DomainError>;

    /// Marks a pending order paid, recording the gateway transaction id.
    async fn mark_paid(
        &self,
        payment_reference: &str,
        transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, DomainError>;

    /// Marks a pending order's payment as failed.
    async fn mark_payment_failed(
        &self,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, DomainError>;

    /// Marks a paid order refunded.
    async fn mark_refunded(
        &self,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, DomainError>;
}
