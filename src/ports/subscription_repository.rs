//! Subscription repository port.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::subscription::Subscription;

use super::order_repository::TransitionOutcome;

/// Port for subscription persistence.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Inserts a new subscription. Used by checkout, not by webhook handling.
    async fn save(&self, subscription: &Subscription) -> Result<(), DomainError>;

    /// Activates a pending, active, or past-due subscription for a fresh
    /// billing period.
    async fn activate(
        &self,
        payment_reference: &str,
        transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, DomainError>;

    /// Marks a non-terminal subscription past due after a failed payment.
    async fn mark_past_due(
        &self,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, DomainError>;
}
