use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Instant, SystemTime};

use crate::handlers::SharedState;
use crate::resilience::{BreakerPhase, BreakerSnapshot};

static START_TIME: LazyLock<SystemTime> = LazyLock::new(SystemTime::now);

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthStatus {
    pub fn current() -> Self {
        let now = SystemTime::now();
        Self {
            status: "healthy".to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: now.duration_since(*START_TIME).unwrap_or_default().as_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub backend: &'static str,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReadinessStatus {
    pub status: String,
    pub counter_store: ServiceStatus,
    pub breakers: Vec<BreakerSnapshot>,
}

/// Liveness: touches no limiter, store or breaker.
pub async fn health_check() -> impl IntoResponse {
    Json(HealthStatus::current())
}

/// Readiness: the counter store must answer a ping. Open breakers are reported
/// as `degraded` without failing the probe.
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let start = Instant::now();
    let ping = state.store.ping().await;
    let response_time_ms = start.elapsed().as_millis() as u64;

    let counter_store = match ping {
        Ok(()) => ServiceStatus {
            backend: state.store.backend(),
            status: "healthy".to_string(),
            response_time_ms,
            error: None,
        },
        Err(err) => ServiceStatus {
            backend: state.store.backend(),
            status: "unavailable".to_string(),
            response_time_ms,
            error: Some(err.to_string()),
        },
    };

    let breakers: Vec<BreakerSnapshot> = state.breakers().iter().map(|b| b.snapshot()).collect();

    let (code, status) = if counter_store.error.is_some() {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    } else if breakers.iter().any(|b| b.phase != BreakerPhase::Closed) {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "ready")
    };

    (
        code,
        Json(ReadinessStatus {
            status: status.to_string(),
            counter_store,
            breakers,
        }),
    )
}
