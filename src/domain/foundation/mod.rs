//! Foundation value objects shared across the domain.
//!
//! - `errors` - DomainError and error codes
//! - `ids` - Strongly-typed UUID identifiers
//! - `timestamp` - UTC timestamp value object

mod errors;
mod ids;
mod timestamp;

pub use errors::{DomainError, ErrorCode};
pub use ids::{AuditLogId, OrderId, SubscriptionId, WebhookEventId};
pub use timestamp::Timestamp;
