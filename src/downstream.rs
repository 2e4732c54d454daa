//! A stand-in for a remote dependency, used by the demo routes to exercise the
//! resilience policies.

use rand::Rng;
use serde::Deserialize;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::resilience::PolicyError;

#[derive(Debug, Error)]
#[error("{dependency} failed")]
pub struct DependencyFailure {
    pub dependency: String,
}

/// Per-call overrides, read from the query string.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CallOptions {
    /// Force the call to fail (`true`) or succeed (`false`).
    pub fail: Option<bool>,
    /// Fixed latency instead of a random one.
    pub delay_ms: Option<u64>,
}

#[derive(Debug)]
pub struct SimulatedDependency {
    name: String,
    failure_rate: f64,
    latency_ms: Range<u64>,
    calls: AtomicU64,
}

impl Default for SimulatedDependency {
    fn default() -> Self {
        Self::new("downstream", 0.1, 5..50)
    }
}

impl SimulatedDependency {
    pub fn new(name: impl Into<String>, failure_rate: f64, latency_ms: Range<u64>) -> Self {
        Self {
            name: name.into(),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency_ms,
            calls: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of calls that actually reached the dependency.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn call(self: Arc<Self>, options: CallOptions) -> Result<String, PolicyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = match options.delay_ms {
            Some(ms) => ms,
            None if self.latency_ms.is_empty() => self.latency_ms.start,
            None => rand::thread_rng().gen_range(self.latency_ms.clone()),
        };
        let fail = options
            .fail
            .unwrap_or_else(|| rand::thread_rng().gen_bool(self.failure_rate));

        tokio::time::sleep(Duration::from_millis(delay)).await;
        debug!(dependency = %self.name, call = n, delay_ms = delay, fail, "dependency call");

        if fail {
            Err(PolicyError::operation(DependencyFailure {
                dependency: self.name.clone(),
            }))
        } else {
            Ok(format!("{} answered call #{}", self.name, n))
        }
    }
}
