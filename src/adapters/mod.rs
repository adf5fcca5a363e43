//! Adapters: concrete implementations of the ports against real
//! infrastructure (Postgres, Redis, HTTP) and in-memory stand-ins.

pub mod audit;
pub mod http;
pub mod postgres;
pub mod rate_limiter;
pub mod secrets;
