//! Rate limiting algorithms
//!
//! Each limiter owns its per-identity state and answers one question per
//! request: admit or deny. Three algorithms are provided:
//!
//! - [`TokenBucketLimiter`]: burst tolerant, continuous refill.
//! - [`FixedWindowLimiter`]: counter reset at window boundaries, backed by a
//!   [`CounterStore`](crate::counter_store::CounterStore) that may be shared
//!   between processes.
//! - [`SlidingLogLimiter`]: exact rolling window over request timestamps,
//!   local to the process.

pub mod fixed_window;
pub mod sliding_log;
pub mod token_bucket;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub use fixed_window::{FailurePolicy, FixedWindowConfig, FixedWindowLimiter};
pub use sliding_log::{SlidingLogConfig, SlidingLogLimiter};
pub use token_bucket::{Bucket, TokenBucketConfig, TokenBucketLimiter};

/// Name of the algorithm that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    FixedWindow,
    SlidingLog,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingLog => "sliding_log",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub algorithm: Algorithm,
    /// Configured limit, exposed as `X-RateLimit-Limit`.
    pub limit: Option<u64>,
    /// Budget left after this request, exposed as `X-RateLimit-Remaining`.
    pub remaining: Option<u64>,
    /// Seconds a denied client should wait, exposed as `Retry-After`.
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    pub fn allowed(algorithm: Algorithm, limit: u64, remaining: Option<u64>) -> Self {
        Self {
            allowed: true,
            algorithm,
            limit: Some(limit),
            remaining,
            retry_after_secs: None,
        }
    }

    pub fn denied(algorithm: Algorithm, limit: u64, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            algorithm,
            limit: Some(limit),
            remaining: Some(0),
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// An admission gate keyed by caller identity.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// Decide whether the request from `identity` may proceed. Only an
    /// allowed request consumes budget.
    async fn admit(&self, identity: &str) -> Decision;

    /// Drop per-identity state idle for longer than `max_idle` that no longer
    /// restricts its identity, so a recreated entry grants no extra budget.
    /// Returns the number of identities removed.
    fn evict_idle(&self, _max_idle: Duration) -> usize {
        0
    }

    /// Number of identities currently tracked in process memory.
    fn tracked_identities(&self) -> usize {
        0
    }
}
