//! Storefront Payments - Kashier webhook intake service
//!
//! Receives payment gateway webhooks, verifies their HMAC signatures,
//! rate-limits hostile traffic, applies idempotent order and subscription
//! status transitions, and keeps an append-only audit trail.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
