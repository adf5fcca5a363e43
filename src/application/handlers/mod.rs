//! Application-layer command handlers.

pub mod payment;
