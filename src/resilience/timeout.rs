//! Timeout enforcement.
//!
//! Two flavours:
//! - [`with_timeout`] spawns the operation and races it against a timer. When
//!   the timer wins the caller gets [`PolicyError::Timeout`] while the
//!   operation keeps running in the background; its result is discarded.
//! - [`with_timeout_cancelling`] drops the operation when the timer wins, so
//!   it stops at its next suspension point.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::PolicyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutMode {
    /// Stop waiting, let the operation run to completion unobserved.
    #[default]
    Detach,
    /// Stop waiting and drop the operation.
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub limit: Duration,
    pub mode: TimeoutMode,
}

impl TimeoutPolicy {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            mode: TimeoutMode::Detach,
        }
    }

    pub fn with_mode(mut self, mode: TimeoutMode) -> Self {
        self.mode = mode;
        self
    }

    pub async fn run<T, F>(&self, fut: F) -> Result<T, PolicyError>
    where
        F: Future<Output = Result<T, PolicyError>> + Send + 'static,
        T: Send + 'static,
    {
        match self.mode {
            TimeoutMode::Detach => with_timeout(fut, self.limit).await,
            TimeoutMode::Cancel => with_timeout_cancelling(fut, self.limit).await,
        }
    }
}

/// Wait at most `limit` for `fut`; on expiry the operation is left running.
pub async fn with_timeout<T, F>(fut: F, limit: Duration) -> Result<T, PolicyError>
where
    F: Future<Output = Result<T, PolicyError>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(fut);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(PolicyError::operation(join_err)),
        Err(_) => {
            // Dropping the JoinHandle detaches the task.
            debug!(limit_ms = limit.as_millis() as u64, "timed out, operation detached");
            Err(PolicyError::Timeout(limit))
        }
    }
}

/// Wait at most `limit` for `fut`; on expiry the operation is dropped.
pub async fn with_timeout_cancelling<T, F>(fut: F, limit: Duration) -> Result<T, PolicyError>
where
    F: Future<Output = Result<T, PolicyError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            debug!(limit_ms = limit.as_millis() as u64, "timed out, operation cancelled");
            Err(PolicyError::Timeout(limit))
        }
    }
}
