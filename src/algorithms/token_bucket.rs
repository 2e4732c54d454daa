use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{Algorithm, Decision, RateLimiter};
use crate::clock::Clock;
use crate::keyed_state::KeyedState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_rate_per_second: f64,
    pub cost_per_request: u32,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_rate_per_second: 1.0,
            cost_per_request: 1,
        }
    }
}

impl TokenBucketConfig {
    /// Fixed wait hint handed to denied clients: the time one token takes to
    /// refill, rounded up to whole seconds.
    pub fn retry_after_secs(&self) -> u64 {
        (1.0 / self.refill_rate_per_second).ceil().max(1.0) as u64
    }
}

/// Token state of a single identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    pub fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    /// Add the tokens accrued since the last refill, capped at capacity.
    pub fn refill(&mut self, capacity: u32, rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(capacity as f64);
        self.last_refill = now;
    }

    pub fn try_consume(&mut self, cost: u32) -> bool {
        if self.tokens >= cost as f64 {
            self.tokens -= cost as f64;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Whether the bucket would be back at capacity if refilled at `now`.
    pub fn is_full_at(&self, capacity: u32, rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens + elapsed.as_secs_f64() * rate >= capacity as f64
    }
}

pub struct TokenBucketLimiter {
    config: TokenBucketConfig,
    clock: Arc<dyn Clock>,
    buckets: KeyedState<Bucket>,
}

impl TokenBucketLimiter {
    pub fn new(config: TokenBucketConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buckets: KeyedState::new(),
        }
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Synchronous admission check; the async trait method delegates here.
    pub fn check(&self, identity: &str) -> Decision {
        let now = self.clock.now();
        let TokenBucketConfig {
            capacity,
            refill_rate_per_second,
            cost_per_request,
        } = self.config;

        let allowed = self.buckets.with_entry(
            identity,
            now,
            || Bucket::full(capacity, now),
            |bucket| {
                bucket.refill(capacity, refill_rate_per_second, now);
                bucket.try_consume(cost_per_request)
            },
        );

        if allowed {
            Decision::allowed(Algorithm::TokenBucket, capacity as u64, None)
        } else {
            debug!(identity, "token bucket empty");
            Decision::denied(
                Algorithm::TokenBucket,
                capacity as u64,
                self.config.retry_after_secs(),
            )
        }
    }

    /// Tokens currently held for `identity`, without refilling.
    pub fn tokens(&self, identity: &str) -> Option<f64> {
        self.buckets.inspect(identity, Bucket::tokens)
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    async fn admit(&self, identity: &str) -> Decision {
        self.check(identity)
    }

    fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let TokenBucketConfig {
            capacity,
            refill_rate_per_second,
            ..
        } = self.config;
        // Only a refilled bucket can be recreated without handing out extra tokens.
        self.buckets.evict(now, max_idle, |bucket| {
            bucket.is_full_at(capacity, refill_rate_per_second, now)
        })
    }

    fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }
}
