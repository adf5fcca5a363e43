//! Audit logging adapters.

mod best_effort;

pub use best_effort::BestEffortAuditLogger;
