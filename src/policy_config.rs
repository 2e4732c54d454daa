use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::algorithms::{FailurePolicy, FixedWindowConfig, SlidingLogConfig, TokenBucketConfig};
use crate::error::{GateError, Result};
use crate::resilience::{BreakerConfig, RetryPolicy, TimeoutMode, TimeoutPolicy};

/// Tunables of every admission and resilience policy.
///
/// Loaded from a JSON file whose keys mirror the option names, e.g.
/// `{"tokenBucket": {"capacity": 20}, "breaker": {"resetTimeoutMs": 5000}}`.
/// Missing keys keep their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyConfig {
    #[validate(nested)]
    pub token_bucket: TokenBucketSettings,
    #[validate(nested)]
    pub window: WindowSettings,
    #[validate(nested)]
    pub breaker: BreakerSettings,
    #[validate(nested)]
    pub retry: RetrySettings,
    #[validate(nested)]
    pub timeout: TimeoutSettings,
    pub eviction: EvictionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenBucketSettings {
    #[validate(range(min = 1))]
    pub capacity: u32,
    #[validate(range(exclusive_min = 0.0))]
    pub refill_rate_per_second: f64,
    #[validate(range(min = 1))]
    pub cost_per_request: u32,
}

impl Default for TokenBucketSettings {
    fn default() -> Self {
        let defaults = TokenBucketConfig::default();
        Self {
            capacity: defaults.capacity,
            refill_rate_per_second: defaults.refill_rate_per_second,
            cost_per_request: defaults.cost_per_request,
        }
    }
}

/// Shared by the fixed-window and sliding-log limiters.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowSettings {
    #[validate(range(min = 1))]
    pub size_seconds: u64,
    #[validate(range(min = 1))]
    pub max_requests: u64,
    /// Admit requests when the counter store is unreachable.
    pub fail_open: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            size_seconds: 60,
            max_requests: 100,
            fail_open: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
#[validate(schema(function = "validate_rolling_window"))]
pub struct BreakerSettings {
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub error_threshold_percentage: f64,
    #[validate(range(min = 1))]
    pub reset_timeout_ms: u64,
    #[serde(with = "humantime_serde")]
    pub rolling_window: Duration,
    #[validate(range(min = 1, max = 1000))]
    pub rolling_buckets: u32,
    pub volume_threshold: u32,
    #[validate(range(min = 1))]
    pub half_open_max_calls: u32,
}

/// Every rolling bucket must span at least one millisecond, otherwise the
/// window never holds an outcome and the breaker can never open.
fn validate_rolling_window(settings: &BreakerSettings) -> std::result::Result<(), ValidationError> {
    let min = Duration::from_millis(u64::from(settings.rolling_buckets));
    if settings.rolling_window.is_zero() || settings.rolling_window < min {
        let mut err = ValidationError::new("rolling_window");
        err.message = Some(
            format!(
                "rollingWindow must be at least {}ms for {} buckets",
                min.as_millis(),
                settings.rolling_buckets
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = BreakerConfig::default();
        Self {
            timeout_ms: defaults.timeout.as_millis() as u64,
            error_threshold_percentage: defaults.error_threshold_percentage,
            reset_timeout_ms: defaults.reset_timeout.as_millis() as u64,
            rolling_window: defaults.rolling_window,
            rolling_buckets: defaults.rolling_buckets,
            volume_threshold: defaults.volume_threshold,
            half_open_max_calls: defaults.half_open_max_calls,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    #[validate(range(max = 16))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: Option<u64>,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: None,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutSettings {
    #[validate(range(min = 1))]
    pub limit_ms: u64,
    pub cancel_on_expiry: bool,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            limit_ms: 2000,
            cancel_on_expiry: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvictionSettings {
    #[serde(with = "humantime_serde")]
    pub idle_after: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for EvictionSettings {
    fn default() -> Self {
        Self {
            idle_after: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl PolicyConfig {
    /// Read and validate a JSON policy file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: PolicyConfig =
            serde_json::from_str(contents).map_err(|e| GateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn token_bucket(&self) -> TokenBucketConfig {
        TokenBucketConfig {
            capacity: self.token_bucket.capacity,
            refill_rate_per_second: self.token_bucket.refill_rate_per_second,
            cost_per_request: self.token_bucket.cost_per_request,
        }
    }

    pub fn fixed_window(&self) -> FixedWindowConfig {
        FixedWindowConfig {
            window_seconds: self.window.size_seconds,
            max_requests: self.window.max_requests,
            failure_policy: if self.window.fail_open {
                FailurePolicy::Open
            } else {
                FailurePolicy::Closed
            },
        }
    }

    pub fn sliding_log(&self) -> SlidingLogConfig {
        SlidingLogConfig {
            window_seconds: self.window.size_seconds,
            max_requests: self.window.max_requests,
        }
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            timeout: Duration::from_millis(self.breaker.timeout_ms),
            timeout_mode: self.timeout_mode(),
            error_threshold_percentage: self.breaker.error_threshold_percentage,
            reset_timeout: Duration::from_millis(self.breaker.reset_timeout_ms),
            rolling_window: self.breaker.rolling_window,
            rolling_buckets: self.breaker.rolling_buckets,
            volume_threshold: self.breaker.volume_threshold,
            half_open_max_calls: self.breaker.half_open_max_calls,
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
        .with_jitter(self.retry.jitter);

        match self.retry.max_delay_ms {
            Some(max) => policy.with_max_delay(Duration::from_millis(max)),
            None => policy,
        }
    }

    pub fn timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::new(Duration::from_millis(self.timeout.limit_ms)).with_mode(self.timeout_mode())
    }

    fn timeout_mode(&self) -> TimeoutMode {
        if self.timeout.cancel_on_expiry {
            TimeoutMode::Cancel
        } else {
            TimeoutMode::Detach
        }
    }
}
