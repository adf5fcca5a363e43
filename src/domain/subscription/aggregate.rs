//! Subscription aggregate.

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};

use super::status::SubscriptionStatus;

/// Default billing period applied when activating a subscription.
const PERIOD_DAYS: i64 = 30;

/// A recurring subscription settled through Kashier.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub payment_reference: String,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<Timestamp>,
    pub transaction_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates a subscription awaiting its first payment.
    pub fn new(payment_reference: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: SubscriptionId::new(),
            payment_reference: payment_reference.into(),
            status: SubscriptionStatus::Pending,
            current_period_end: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// End of the billing period that starts now.
    ///
    /// Repositories use this when applying activation as a conditional
    /// update instead of loading the aggregate.
    pub fn next_period_end() -> Timestamp {
        Timestamp::now().add_days(PERIOD_DAYS)
    }

    /// Activates the subscription for a fresh billing period.
    ///
    /// Valid from `Pending` (first payment) and `PastDue` (recovered
    /// payment), and from `Active` for renewals.
    pub fn activate(&mut self, transaction_id: Option<String>) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(SubscriptionStatus::Active));
        }
        self.status = SubscriptionStatus::Active;
        self.transaction_id = transaction_id;
        self.current_period_end = Some(Self::next_period_end());
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Records a failed period payment.
    pub fn mark_past_due(&mut self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(SubscriptionStatus::PastDue));
        }
        self.status = SubscriptionStatus::PastDue;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    fn transition_error(&self, target: SubscriptionStatus) -> DomainError {
        DomainError::new(
            ErrorCode::InvalidStateTransition,
            format!("Cannot move subscription from {} to {}", self.status, target),
        )
        .with_detail("payment_reference", self.payment_reference.as_str())
    }
}
