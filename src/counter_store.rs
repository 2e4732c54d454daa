//! Expiring counters used by the fixed-window limiter.
//!
//! A store hands out atomically incremented counters that vanish once their
//! window expires. The in-memory store serves a single instance; the Redis
//! store (see [`crate::redis`]) can be shared by every instance behind a load
//! balancer.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::clock::Clock;
use crate::keyed_state::KeyedState;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one to `key` and return the new value. When the new
    /// value is `1` the counter is set to expire after `window`.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    /// Cheap reachability probe for readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;

    /// Drop expired counters held in process memory.
    fn purge_expired(&self) -> usize {
        0
    }
}

/// Count of requests in the current window of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    pub count: u64,
    pub expires_at: Instant,
}

impl WindowCounter {
    fn is_expired(&self, now: Instant) -> bool {
        self.count == 0 || now >= self.expires_at
    }
}

pub struct MemoryCounterStore {
    clock: Arc<dyn Clock>,
    counters: KeyedState<WindowCounter>,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: KeyedState::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let count = self.counters.with_entry(
            key,
            now,
            || WindowCounter {
                count: 0,
                expires_at: now,
            },
            |counter| {
                if counter.is_expired(now) {
                    counter.count = 0;
                }
                counter.count += 1;
                if counter.count == 1 {
                    counter.expires_at = now + window;
                }
                counter.count
            },
        );
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.counters
            .evict(now, Duration::ZERO, |counter| counter.is_expired(now))
    }
}
