use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::algorithms::RateLimiter;
use crate::identity::{client_ip, KeyStrategy};
use crate::metrics::MetricsCollector;
use crate::response::{apply_rate_limit_headers, RateLimitExceeded};

pub const REQUEST_ID: &str = "x-request-id";

/// Logging middleware for request/response tracking
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = client_ip(&request);

    let request_id = match request.headers().get(REQUEST_ID) {
        Some(id) => id.clone(),
        None => {
            let id = HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
            request.headers_mut().insert(REQUEST_ID, id.clone());
            id
        }
    };
    let id = request_id.to_str().unwrap_or("invalid").to_string();

    info!(
        target: "floodgate::middleware",
        request_id = %id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    let status = response.status();
    info!(
        target: "floodgate::middleware",
        request_id = %id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response.headers_mut().insert(REQUEST_ID, request_id);
    response
}

/// One limiter in front of a group of routes.
#[derive(Clone)]
pub struct AdmissionGate {
    pub limiter: Arc<dyn RateLimiter>,
    pub metrics: MetricsCollector,
    pub strategy: KeyStrategy,
}

/// Answer `429` before the handler runs when the limiter denies the caller.
pub async fn admission_middleware(
    State(gate): State<AdmissionGate>,
    request: Request,
    next: Next,
) -> Response {
    let identity = gate.strategy.identify(&request);
    let decision = gate.limiter.admit(&identity).await;
    gate.metrics
        .record_decision(decision.algorithm, decision.allowed)
        .await;

    if !decision.allowed {
        debug!(
            target: "floodgate::middleware",
            identity = %identity,
            algorithm = %decision.algorithm,
            retry_after = ?decision.retry_after_secs,
            "Request denied"
        );
        return RateLimitExceeded::from_decision(&decision).into_response();
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}
