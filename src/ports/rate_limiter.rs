//! Rate limiter port.
//!
//! Fixed-window counting over three identifier classes, plus explicit
//! block/unblock controls for the admin surface. Backend failures surface
//! as errors; the caller decides whether to fail open.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Timestamp};

/// Identifier class being limited. Each scope has its own window and
/// threshold, keyed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    /// Source IP of the inbound call.
    Ip,
    /// Customer reference carried in the payload.
    Customer,
    /// Tokenized card identifier carried in the payload.
    Card,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::Ip => "ip",
            RateLimitScope::Customer => "customer",
            RateLimitScope::Card => "card",
        }
    }
}

/// Snapshot of an identifier's budget within the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Maximum attempts permitted per window.
    pub limit: u32,
    /// Attempts left in the current window.
    pub remaining: u32,
    /// Seconds until the current window resets.
    pub reset_secs: u32,
}

/// Details of a denied attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDenied {
    pub limit: u32,
    /// Seconds the caller should wait before retrying.
    pub retry_after_secs: u32,
    /// When an explicit block lifts. None for window exhaustion and for
    /// permanent blocks (which never lift on their own).
    pub blocked_until: Option<Timestamp>,
}

/// Outcome of a counted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed(RateLimitStatus),
    Denied(RateLimitDenied),
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, RateLimitResult::Denied(_))
    }
}

/// Port for rate limiting webhook traffic.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counts one attempt for the identifier and reports whether it may
    /// proceed. Counting and checking happen atomically.
    async fn check(
        &self,
        scope: RateLimitScope,
        identifier: &str,
    ) -> Result<RateLimitResult, DomainError>;

    /// Reads the current budget without consuming an attempt.
    async fn status(
        &self,
        scope: RateLimitScope,
        identifier: &str,
    ) -> Result<RateLimitStatus, DomainError>;

    /// Clears the identifier's window counter and any block.
    async fn reset(&self, scope: RateLimitScope, identifier: &str) -> Result<(), DomainError>;

    /// Blocks the identifier outright. `until` of None means permanent;
    /// otherwise the block expires at the given instant.
    async fn block(
        &self,
        scope: RateLimitScope,
        identifier: &str,
        until: Option<Timestamp>,
    ) -> Result<(), DomainError>;

    /// Removes an explicit block. The window counter is left untouched.
    async fn unblock(&self, scope: RateLimitScope, identifier: &str) -> Result<(), DomainError>;
}
