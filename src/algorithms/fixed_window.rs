//! Fixed-window counter rate limiting algorithm
//!
//! Counts requests per identity in discrete windows that start on the first
//! request and reset when the store expires the counter. Up to twice the
//! limit can pass in a short span straddling a window boundary; use the
//! sliding log when that burst matters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Algorithm, Decision, RateLimiter};
use crate::counter_store::CounterStore;

/// What to do when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request unchecked.
    #[default]
    Open,
    /// Deny the request as if the window were exhausted.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    pub window_seconds: u64,
    pub max_requests: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for FixedWindowConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_requests: 100,
            failure_policy: FailurePolicy::Open,
        }
    }
}

impl FixedWindowConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

pub struct FixedWindowLimiter {
    config: FixedWindowConfig,
    store: Arc<dyn CounterStore>,
}

impl FixedWindowLimiter {
    pub fn new(config: FixedWindowConfig, store: Arc<dyn CounterStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &FixedWindowConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    async fn admit(&self, identity: &str) -> Decision {
        let limit = self.config.max_requests;

        let count = match self.store.increment(identity, self.config.window()).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    identity,
                    backend = self.store.backend(),
                    policy = ?self.config.failure_policy,
                    error = %e,
                    "counter store failed, applying failure policy"
                );
                return match self.config.failure_policy {
                    FailurePolicy::Open => Decision::allowed(Algorithm::FixedWindow, limit, None),
                    FailurePolicy::Closed => {
                        Decision::denied(Algorithm::FixedWindow, limit, self.config.window_seconds)
                    }
                };
            }
        };

        if count > limit {
            debug!(identity, count, limit, "fixed window exhausted");
            Decision::denied(Algorithm::FixedWindow, limit, self.config.window_seconds)
        } else {
            Decision::allowed(Algorithm::FixedWindow, limit, Some(limit.saturating_sub(count)))
        }
    }

    fn evict_idle(&self, _max_idle: Duration) -> usize {
        self.store.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::counter_store::{MemoryCounterStore, StoreError};

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    fn memory_limiter(clock: &ManualClock) -> FixedWindowLimiter {
        FixedWindowLimiter::new(
            FixedWindowConfig::default(),
            Arc::new(MemoryCounterStore::new(Arc::new(clock.clone()))),
        )
    }

    #[tokio::test]
    async fn test_limit_within_window() {
        let clock = ManualClock::new();
        let limiter = memory_limiter(&clock);

        for i in 1..=100u64 {
            let decision = limiter.admit("client").await;
            assert!(decision.allowed, "request {} should pass", i);
            assert_eq!(decision.remaining, Some(100 - i));
        }

        let denied = limiter.admit("client").await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, Some(60));
    }

    #[tokio::test]
    async fn test_window_expiry_resets_remaining() {
        let clock = ManualClock::new();
        let limiter = memory_limiter(&clock);
        for _ in 0..101 {
            limiter.admit("client").await;
        }

        clock.advance(Duration::from_secs(60));
        let decision = limiter.admit("client").await;
        assert!(decision.allowed);
        assert_eq!(decision.limit, Some(100));
        assert_eq!(decision.remaining, Some(99));
    }

    #[tokio::test]
    async fn test_boundary_burst_is_a_known_limitation() {
        let clock = ManualClock::new();
        let limiter = FixedWindowLimiter::new(
            FixedWindowConfig {
                window_seconds: 10,
                max_requests: 5,
                failure_policy: FailurePolicy::Open,
            },
            Arc::new(MemoryCounterStore::new(Arc::new(clock.clone()))),
        );

        limiter.admit("c").await;
        clock.advance(Duration::from_secs(9));
        for _ in 0..4 {
            assert!(limiter.admit("c").await.allowed);
        }
        clock.advance(Duration::from_secs(1));
        for _ in 0..5 {
            assert!(limiter.admit("c").await.allowed);
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = FixedWindowLimiter::new(FixedWindowConfig::default(), Arc::new(BrokenStore));
        let decision = limiter.admit("client").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, None);
    }

    #[tokio::test]
    async fn test_store_failure_can_fail_closed() {
        let config = FixedWindowConfig {
            failure_policy: FailurePolicy::Closed,
            ..FixedWindowConfig::default()
        };
        let limiter = FixedWindowLimiter::new(config, Arc::new(BrokenStore));
        let decision = limiter.admit("client").await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, Some(60));
    }
}
