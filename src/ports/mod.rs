//! Ports: trait boundaries between the domain and the outside world.
//! Adapters implement these; application handlers depend only on them.

mod audit_logger;
mod order_repository;
mod rate_limiter;
mod secret_provider;
mod subscription_repository;
mod webhook_event_repository;

pub use audit_logger::{AuditEventType, AuditLogEntry, AuditLogger};
pub use order_repository::{OrderRepository, TransitionOutcome};
pub use rate_limiter::{
    RateLimitDenied, RateLimitResult, RateLimitScope, RateLimitStatus, RateLimiter,
};
pub use secret_provider::WebhookSecretProvider;
pub use subscription_repository::SubscriptionRepository;
pub use webhook_event_repository::{
    ProcessingStatus, SaveResult, WebhookEventRecord, WebhookEventRepository,
};
