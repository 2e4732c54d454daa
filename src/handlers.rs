use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::algorithms::{
    Algorithm, FixedWindowLimiter, RateLimiter, SlidingLogLimiter, TokenBucketLimiter,
};
use crate::clock::Clock;
use crate::counter_store::CounterStore;
use crate::downstream::{CallOptions, SimulatedDependency};
use crate::error::GateError;
use crate::identity::KeyStrategy;
use crate::metrics::MetricsCollector;
use crate::policy_config::PolicyConfig;
use crate::resilience::{CircuitBreaker, RetryPolicy, TimeoutPolicy};
use crate::response::{AdmittedResponse, DependencyResponse};

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Limiters, policies and the dependency they guard
pub struct AppState {
    pub policy: PolicyConfig,
    pub store: Arc<dyn CounterStore>,
    pub token_bucket: Arc<TokenBucketLimiter>,
    pub fixed_window: Arc<FixedWindowLimiter>,
    pub sliding_log: Arc<SlidingLogLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub flaky_breaker: Arc<CircuitBreaker>,
    pub retry: RetryPolicy,
    pub timeout: TimeoutPolicy,
    pub dependency: Arc<SimulatedDependency>,
    pub metrics: MetricsCollector,
    pub strategy: KeyStrategy,
}

impl AppState {
    pub fn new(
        policy: PolicyConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        strategy: KeyStrategy,
    ) -> Self {
        Self {
            token_bucket: Arc::new(TokenBucketLimiter::new(policy.token_bucket(), clock.clone())),
            fixed_window: Arc::new(FixedWindowLimiter::new(policy.fixed_window(), store.clone())),
            sliding_log: Arc::new(SlidingLogLimiter::new(policy.sliding_log(), clock.clone())),
            breaker: Arc::new(CircuitBreaker::new("dependency", policy.breaker(), clock.clone())),
            flaky_breaker: Arc::new(CircuitBreaker::new("flaky", policy.breaker(), clock)),
            retry: policy.retry(),
            timeout: policy.timeout(),
            dependency: Arc::new(SimulatedDependency::default()),
            metrics: MetricsCollector::new(),
            store,
            strategy,
            policy,
        }
    }

    /// Replace the simulated dependency.
    pub fn with_dependency(mut self, dependency: SimulatedDependency) -> Self {
        self.dependency = Arc::new(dependency);
        self
    }

    pub fn limiters(&self) -> Vec<Arc<dyn RateLimiter>> {
        vec![
            self.token_bucket.clone() as Arc<dyn RateLimiter>,
            self.fixed_window.clone() as Arc<dyn RateLimiter>,
            self.sliding_log.clone() as Arc<dyn RateLimiter>,
        ]
    }

    pub fn breakers(&self) -> [&Arc<CircuitBreaker>; 2] {
        [&self.breaker, &self.flaky_breaker]
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FlakyParams {
    /// Attempts that fail before the dependency recovers.
    #[serde(default)]
    pub failures: u32,
}

pub async fn token_bucket_resource() -> impl IntoResponse {
    Json(AdmittedResponse::new(Algorithm::TokenBucket))
}

pub async fn fixed_window_resource() -> impl IntoResponse {
    Json(AdmittedResponse::new(Algorithm::FixedWindow))
}

pub async fn sliding_log_resource() -> impl IntoResponse {
    Json(AdmittedResponse::new(Algorithm::SlidingLog))
}

/// Call the dependency through the circuit breaker
pub async fn call_dependency(
    State(state): State<SharedState>,
    Query(options): Query<CallOptions>,
) -> Result<impl IntoResponse, GateError> {
    let dependency = state.dependency.clone();
    let result = state
        .breaker
        .execute(move || dependency.call(options))
        .await?;

    Ok(Json(DependencyResponse {
        result,
        attempts: None,
    }))
}

/// Call the dependency under the standalone timeout policy
pub async fn call_slow(
    State(state): State<SharedState>,
    Query(options): Query<CallOptions>,
) -> Result<impl IntoResponse, GateError> {
    let result = state
        .timeout
        .run(state.dependency.clone().call(options))
        .await?;

    Ok(Json(DependencyResponse {
        result,
        attempts: None,
    }))
}

/// Retry a dependency that fails its first `failures` attempts, each attempt
/// going through the flaky breaker
pub async fn call_flaky(
    State(state): State<SharedState>,
    Query(params): Query<FlakyParams>,
) -> Result<impl IntoResponse, GateError> {
    let attempts = AtomicU32::new(0);

    let result = state
        .retry
        .run(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let dependency = state.dependency.clone();
            let options = CallOptions {
                fail: Some(attempt < params.failures),
                delay_ms: Some(0),
            };
            let breaker = state.flaky_breaker.clone();
            async move { breaker.execute(move || dependency.call(options)).await }
        })
        .await?;

    Ok(Json(DependencyResponse {
        result,
        attempts: Some(attempts.load(Ordering::SeqCst)),
    }))
}

/// Snapshots of every breaker
pub async fn breaker_status(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshots: Vec<_> = state.breakers().iter().map(|b| b.snapshot()).collect();
    Json(snapshots)
}

/// Admission totals, global and per algorithm
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    let per_algorithm: BTreeMap<&'static str, _> = state
        .metrics
        .get_all()
        .await
        .into_iter()
        .map(|(algorithm, m)| (algorithm.as_str(), m))
        .collect();

    let tracked: BTreeMap<&'static str, usize> = state
        .limiters()
        .iter()
        .map(|l| (l.algorithm().as_str(), l.tracked_identities()))
        .collect();

    Json(serde_json::json!({
        "global": state.metrics.get_global().await,
        "per_algorithm": per_algorithm,
        "tracked_identities": tracked,
    }))
}
