//! Rate limiter adapters: Redis for production, in-memory for tests and
//! local development.

mod config;
mod in_memory;
mod redis;

pub use config::{RateLimitConfig, WindowLimits};
pub use in_memory::InMemoryRateLimiter;
pub use redis::RedisRateLimiter;
