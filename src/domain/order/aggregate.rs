//! Order aggregate.

use crate::domain::foundation::{DomainError, ErrorCode, OrderId, Timestamp};

use super::status::OrderStatus;

/// An order placed through the storefront, settled via Kashier.
///
/// `payment_reference` is the merchant order id sent to the gateway at
/// checkout; webhooks address the order through it, never through the
/// internal id.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub payment_reference: String,
    pub status: OrderStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub transaction_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    /// Creates a new order awaiting payment.
    pub fn new(payment_reference: impl Into<String>, amount_cents: i64, currency: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: OrderId::new(),
            payment_reference: payment_reference.into(),
            status: OrderStatus::Pending,
            amount_cents,
            currency: currency.into(),
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a successful payment.
    ///
    /// Only valid from `Pending`. Duplicate settlement attempts are handled
    /// one level up by the repository's conditional update; reaching this
    /// method from any other state is a logic error.
    pub fn mark_paid(&mut self, transaction_id: Option<String>) -> Result<(), DomainError> {
        if self.status != OrderStatus::Pending {
            return Err(self.transition_error(OrderStatus::Paid));
        }
        self.status = OrderStatus::Paid;
        self.transaction_id = transaction_id;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Records a failed payment attempt.
    pub fn mark_payment_failed(&mut self) -> Result<(), DomainError> {
        if self.status != OrderStatus::Pending {
            return Err(self.transition_error(OrderStatus::PaymentFailed));
        }
        self.status = OrderStatus::PaymentFailed;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Records a gateway-initiated refund. Only valid from `Paid`.
    pub fn mark_refunded(&mut self) -> Result<(), DomainError> {
        if self.status != OrderStatus::Paid {
            return Err(self.transition_error(OrderStatus::Refunded));
        }
        self.status = OrderStatus::Refunded;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    fn transition_error(&self, target: OrderStatus) -> DomainError {
        DomainError::new(
            ErrorCode::InvalidStateTransition,
            format!("Cannot move order from {} to {}", self.status, target),
        )
        .with_detail("payment_reference", self.payment_reference.as_str())
    }
}
