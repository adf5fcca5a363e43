//! Redis-backed rate limiter for production deployments.
//!
//! Fixed-window counters via INCR + EXPIRE, block markers via SET with an
//! optional TTL. INCR is atomic, so concurrent webhook deliveries across
//! servers never lose a count. The known fixed-window edge (a brief burst
//! across a window boundary) is acceptable for webhook traffic.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::{
    RateLimitDenied, RateLimitResult, RateLimitScope, RateLimitStatus, RateLimiter,
};

use super::config::{block_key, counter_key, RateLimitConfig};

/// Nominal retry hint for permanent blocks.
const PERMANENT_RETRY_SECS: u32 = 86_400;

#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: MultiplexedConnection,
    config: RateLimitConfig,
}

impl RedisRateLimiter {
    pub fn new(conn: MultiplexedConnection, config: RateLimitConfig) -> Self {
        Self { conn, config }
    }

    /// Reads the block marker's TTL: -2 means no block, -1 means a
    /// permanent block, positive is seconds remaining on a timed block.
    async fn block_ttl(&self, bkey: &str) -> Result<i64, DomainError> {
        let mut conn = self.conn.clone();
        conn.ttl(bkey)
            .await
            .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(
        &self,
        scope: RateLimitScope,
        identifier: &str,
    ) -> Result<RateLimitResult, DomainError> {
        let limits = self.config.limits_for(scope);
        let bkey = block_key(scope, identifier);

        match self.block_ttl(&bkey).await? {
            -2 => {}
            -1 => {
                return Ok(RateLimitResult::Denied(RateLimitDenied {
                    limit: limits.max_attempts,
                    retry_after_secs: PERMANENT_RETRY_SECS,
                    blocked_until: None,
                }));
            }
            ttl => {
                let until = Timestamp::now().add_secs(ttl.max(1));
                return Ok(RateLimitResult::Denied(RateLimitDenied {
                    limit: limits.max_attempts,
                    retry_after_secs: ttl.max(1) as u32,
                    blocked_until: Some(until),
                }));
            }
        }

        let ckey = counter_key(scope, identifier);
        let mut conn = self.conn.clone();

        let count: i64 = conn
            .incr(&ckey, 1_i64)
            .await
            .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;

        // First attempt in the window owns the expiry.
        if count == 1 {
            conn.expire::<_, ()>(&ckey, limits.window_secs as i64)
                .await
                .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;
        }

        if count as u32 > limits.max_attempts {
            // Exhausting the window starts a temporary block.
            conn.set_ex::<_, _, ()>(&bkey, 1_i64, limits.block_secs as u64)
                .await
                .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;

            let until = Timestamp::now().add_secs(limits.block_secs as i64);
            return Ok(RateLimitResult::Denied(RateLimitDenied {
                limit: limits.max_attempts,
                retry_after_secs: limits.block_secs.max(1),
                blocked_until: Some(until),
            }));
        }

        let ttl: i64 = conn
            .ttl(&ckey)
            .await
            .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;
        let reset_secs = if ttl > 0 { ttl as u32 } else { limits.window_secs };

        Ok(RateLimitResult::Allowed(RateLimitStatus {
            limit: limits.max_attempts,
            remaining: limits.max_attempts.saturating_sub(count as u32),
            reset_secs,
        }))
    }

    async fn status(
        &self,
        scope: RateLimitScope,
        identifier: &str,
    ) -> Result<RateLimitStatus, DomainError> {
        let limits = self.config.limits_for(scope);
        let ckey = counter_key(scope, identifier);
        let mut conn = self.conn.clone();

        let count: Option<i64> = conn
            .get(&ckey)
            .await
            .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;
        let count = count.unwrap_or(0) as u32;

        let ttl: i64 = conn
            .ttl(&ckey)
            .await
            .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;
        let reset_secs = if ttl > 0 { ttl as u32 } else { limits.window_secs };

        Ok(RateLimitStatus {
            limit: limits.max_attempts,
            remaining: limits.max_attempts.saturating_sub(count),
            reset_secs,
        })
    }

    async fn reset(&self, scope: RateLimitScope, identifier: &str) -> Result<(), DomainError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(vec![
            counter_key(scope, identifier),
            block_key(scope, identifier),
        ])
        .await
        .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;
        Ok(())
    }

    async fn block(
        &self,
        scope: RateLimitScope,
        identifier: &str,
        until: Option<Timestamp>,
    ) -> Result<(), DomainError> {
        let bkey = block_key(scope, identifier);
        let mut conn = self.conn.clone();

        match until {
            Some(until) => {
                let secs = until
                    .as_unix_secs()
                    .saturating_sub(Timestamp::now().as_unix_secs())
                    .max(1);
                conn.set_ex::<_, _, ()>(&bkey, 1_i64, secs)
                    .await
                    .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;
            }
            None => {
                // No expiry: the block holds until an explicit unblock.
                conn.set::<_, _, ()>(&bkey, 1_i64)
                    .await
                    .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn unblock(&self, scope: RateLimitScope, identifier: &str) -> Result<(), DomainError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(block_key(scope, identifier))
            .await
            .map_err(|e: redis::RedisError| DomainError::cache(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
