//! In-memory rate limiter for tests and single-process development.
//!
//! Fixed-window counters in a HashMap behind one RwLock. Counting and
//! checking happen under a single write guard, so the atomicity contract
//! of the port holds without a backing store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::{
    RateLimitDenied, RateLimitResult, RateLimitScope, RateLimitStatus, RateLimiter,
};

use super::config::{block_key, counter_key, RateLimitConfig};

/// Nominal retry hint for permanent blocks, which only lift via an
/// explicit admin unblock.
const PERMANENT_RETRY_SECS: u32 = 86_400;

#[derive(Debug, Clone)]
struct WindowState {
    count: u32,
    window_start: u64,
}

/// Expiry of an explicit block. None means permanent.
type BlockUntil = Option<u64>;

/// In-memory fixed-window rate limiter.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    windows: Arc<RwLock<HashMap<String, WindowState>>>,
    blocks: Arc<RwLock<HashMap<String, BlockUntil>>>,
}

impl InMemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(RwLock::new(HashMap::new())),
            blocks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    fn now_secs() -> u64 {
        Timestamp::now().as_unix_secs()
    }

    /// Returns remaining block seconds if the key is blocked. Expired
    /// blocks are removed on sight.
    async fn active_block(&self, key: &str, now: u64) -> Option<RateLimitDenied> {
        let mut blocks = self.blocks.write().await;
        match blocks.get(key).copied() {
            Some(None) => Some(RateLimitDenied {
                limit: 0,
                retry_after_secs: PERMANENT_RETRY_SECS,
                blocked_until: None,
            }),
            Some(Some(until)) if until > now => Some(RateLimitDenied {
                limit: 0,
                retry_after_secs: (until - now).max(1) as u32,
                blocked_until: Some(Timestamp::from_unix_secs(until)),
            }),
            Some(Some(_)) => {
                blocks.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(
        &self,
        scope: RateLimitScope,
        identifier: &str,
    ) -> Result<RateLimitResult, DomainError> {
        let limits = self.config.limits_for(scope);
        let now = Self::now_secs();
        let bkey = block_key(scope, identifier);

        if let Some(mut denied) = self.active_block(&bkey, now).await {
            denied.limit = limits.max_attempts;
            return Ok(RateLimitResult::Denied(denied));
        }

        let ckey = counter_key(scope, identifier);
        let mut windows = self.windows.write().await;

        let state = windows.entry(ckey).or_insert_with(|| WindowState {
            count: 0,
            window_start: now,
        });

        let window_end = state.window_start + limits.window_secs as u64;
        if now >= window_end {
            state.count = 0;
            state.window_start = now;
        }

        state.count += 1;

        if state.count > limits.max_attempts {
            // Exhausting the window starts a temporary block.
            let until = now + limits.block_secs as u64;
            drop(windows);
            self.blocks.write().await.insert(bkey, Some(until));

            return Ok(RateLimitResult::Denied(RateLimitDenied {
                limit: limits.max_attempts,
                retry_after_secs: limits.block_secs.max(1),
                blocked_until: Some(Timestamp::from_unix_secs(until)),
            }));
        }

        let reset_secs =
            (state.window_start + limits.window_secs as u64).saturating_sub(now) as u32;

        Ok(RateLimitResult::Allowed(RateLimitStatus {
            limit: limits.max_attempts,
            remaining: limits.max_attempts - state.count,
            reset_secs,
        }))
    }

    async fn status(
        &self,
        scope: RateLimitScope,
        identifier: &str,
    ) -> Result<RateLimitStatus, DomainError> {
        let limits = self.config.limits_for(scope);
        let now = Self::now_secs();
        let ckey = counter_key(scope, identifier);

        let windows = self.windows.read().await;
        let (count, reset_secs) = windows
            .get(&ckey)
            .filter(|state| now < state.window_start + limits.window_secs as u64)
            .map(|state| {
                let reset =
                    (state.window_start + limits.window_secs as u64).saturating_sub(now) as u32;
                (state.count, reset)
            })
            .unwrap_or((0, limits.window_secs));

        Ok(RateLimitStatus {
            limit: limits.max_attempts,
            remaining: limits.max_attempts.saturating_sub(count),
            reset_secs,
        })
    }

    async fn reset(&self, scope: RateLimitScope, identifier: &str) -> Result<(), DomainError> {
        self.windows
            .write()
            .await
            .remove(&counter_key(scope, identifier));
        self.blocks
            .write()
            .await
            .remove(&block_key(scope, identifier));
        Ok(())
    }

    async fn block(
        &self,
        scope: RateLimitScope,
        identifier: &str,
        until: Option<Timestamp>,
    ) -> Result<(), DomainError> {
        self.blocks
            .write()
            .await
            .insert(block_key(scope, identifier), until.map(|t| t.as_unix_secs()));
        Ok(())
    }

    async fn unblock(&self, scope: RateLimitScope, identifier: &str) -> Result<(), DomainError> {
        self.blocks
            .write()
            .await
            .remove(&block_key(scope, identifier));
        Ok(())
    }
}
