//! Rate limit thresholds per identifier class.

use serde::Deserialize;

use crate::ports::RateLimitScope;

/// Limits for one identifier class.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowLimits {
    /// Attempts permitted per window.
    pub max_attempts: u32,
    /// Window length in seconds.
    pub window_secs: u32,
    /// How long a temporary block lasts once the window is exhausted.
    pub block_secs: u32,
}

/// Per-scope rate limit configuration.
///
/// Card limits are the tightest since card testing is the attack these
/// thresholds exist to slow down.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_ip: WindowLimits,
    pub per_customer: WindowLimits,
    pub per_card: WindowLimits,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_ip: WindowLimits {
                max_attempts: 100,
                window_secs: 600,
                block_secs: 600,
            },
            per_customer: WindowLimits {
                max_attempts: 20,
                window_secs: 600,
                block_secs: 600,
            },
            per_card: WindowLimits {
                max_attempts: 10,
                window_secs: 1800,
                block_secs: 1800,
            },
        }
    }
}

impl RateLimitConfig {
    pub fn limits_for(&self, scope: RateLimitScope) -> WindowLimits {
        match scope {
            RateLimitScope::Ip => self.per_ip,
            RateLimitScope::Customer => self.per_customer,
            RateLimitScope::Card => self.per_card,
        }
    }
}

/// Storage key for an identifier's window counter.
pub(super) fn counter_key(scope: RateLimitScope, identifier: &str) -> String {
    format!("ratelimit:{}:{}", scope.as_str(), identifier)
}

/// Storage key for an identifier's explicit block marker.
pub(super) fn block_key(scope: RateLimitScope, identifier: &str) -> String {
    format!("ratelimit:block:{}:{}", scope.as_str(), identifier)
}
