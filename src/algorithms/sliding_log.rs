//! Sliding log rate limiting algorithm
//!
//! Keeps the timestamp of every admitted request in the current window and
//! counts only those younger than the window size, giving a true rolling
//! window. The log lives in process memory, so each instance enforces its
//! own limit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{Algorithm, Decision, RateLimiter};
use crate::clock::Clock;
use crate::keyed_state::KeyedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingLogConfig {
    pub window_seconds: u64,
    pub max_requests: u64,
}

impl Default for SlidingLogConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_requests: 100,
        }
    }
}

impl SlidingLogConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Drop timestamps that have aged out of the window.
fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = log.front() {
        if now.saturating_duration_since(*oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

pub struct SlidingLogLimiter {
    config: SlidingLogConfig,
    clock: Arc<dyn Clock>,
    logs: KeyedState<VecDeque<Instant>>,
}

impl SlidingLogLimiter {
    pub fn new(config: SlidingLogConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            logs: KeyedState::new(),
        }
    }

    pub fn config(&self) -> &SlidingLogConfig {
        &self.config
    }

    pub fn check(&self, identity: &str) -> Decision {
        let now = self.clock.now();
        let window = self.config.window();
        let limit = self.config.max_requests;

        let admitted = self.logs.with_entry(identity, now, VecDeque::new, |log| {
            prune(log, now, window);
            if log.len() as u64 >= limit {
                None
            } else {
                log.push_back(now);
                Some(log.len() as u64)
            }
        });

        match admitted {
            Some(count) => {
                Decision::allowed(Algorithm::SlidingLog, limit, Some(limit.saturating_sub(count)))
            }
            None => {
                debug!(identity, limit, "sliding log full");
                Decision::denied(Algorithm::SlidingLog, limit, self.config.window_seconds)
            }
        }
    }

    /// Number of timestamps currently logged for `identity`.
    pub fn log_len(&self, identity: &str) -> Option<usize> {
        self.logs.inspect(identity, VecDeque::len)
    }
}

#[async_trait]
impl RateLimiter for SlidingLogLimiter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingLog
    }

    async fn admit(&self, identity: &str) -> Decision {
        self.check(identity)
    }

    fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let window = self.config.window();
        // A log whose newest entry has aged out holds no budget.
        self.logs.evict(now, max_idle, |log| {
            log.back()
                .map_or(true, |newest| now.saturating_duration_since(*newest) >= window)
        })
    }

    fn tracked_identities(&self) -> usize {
        self.logs.len()
    }
}
