//! PostgreSQL adapters for the persistence ports.

mod audit_log;
mod order_repository;
mod subscription_repository;
mod webhook_event_repository;

pub use audit_log::PostgresAuditLogger;
pub use order_repository::PostgresOrderRepository;
pub use subscription_repository::PostgresSubscriptionRepository;
pub use webhook_event_repository::PostgresWebhookEventRepository;
