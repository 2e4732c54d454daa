//! Resilience policies for calls to downstream dependencies.
//!
//! ```text
//! handler
//!     → retry.rs (re-run failed attempts with exponential backoff)
//!     → circuit_breaker.rs (fail fast while the dependency is unhealthy)
//!     → timeout.rs (cap how long the caller waits for one attempt)
//!     → dependency
//! ```
//!
//! The policies are independent and compose in any order. Every wrapped
//! operation yields `Result<T, PolicyError>`; plain errors are lifted with
//! [`PolicyError::operation`].

pub mod circuit_breaker;
pub mod retry;
pub mod rolling;
pub mod timeout;

use std::time::Duration;
use thiserror::Error;

pub use circuit_breaker::{
    BreakerConfig, BreakerEvent, BreakerPhase, BreakerSnapshot, CircuitBreaker,
};
pub use retry::RetryPolicy;
pub use timeout::{with_timeout, with_timeout_cancelling, TimeoutMode, TimeoutPolicy};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// The breaker short-circuited the call without running it.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// The operation did not finish within its time budget. Its side effects
    /// may still happen.
    #[error("operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("operation failed after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<PolicyError>,
    },

    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),
}

impl PolicyError {
    pub fn operation(err: impl Into<BoxError>) -> Self {
        PolicyError::Operation(err.into())
    }

    /// Short machine-readable name of the policy that produced this error.
    pub fn policy(&self) -> &'static str {
        match self {
            PolicyError::CircuitOpen { .. } => "circuit_breaker",
            PolicyError::Timeout(_) => "timeout",
            PolicyError::RetryExhausted { .. } => "retry",
            PolicyError::Operation(_) => "operation",
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, PolicyError::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PolicyError::Timeout(_))
    }
}
