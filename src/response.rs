use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::algorithms::{Algorithm, Decision};

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Body of a `429` answer.
#[derive(Debug, Serialize)]
pub struct RateLimitExceeded {
    pub error: String,
    pub algorithm: Algorithm,
    #[serde(skip)]
    pub retry_after_secs: u64,
}

impl RateLimitExceeded {
    pub fn from_decision(decision: &Decision) -> Self {
        Self {
            error: "Rate limit exceeded".to_string(),
            algorithm: decision.algorithm,
            retry_after_secs: decision.retry_after_secs.unwrap_or(1),
        }
    }
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let retry_after = HeaderValue::from(self.retry_after_secs);
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response();
        response.headers_mut().insert(header::RETRY_AFTER, retry_after);
        response
    }
}

/// Stamp `X-RateLimit-*` headers of an allowed decision.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    if let Some(limit) = decision.limit {
        headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    }
    if let Some(remaining) = decision.remaining {
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    }
}

/// Body of a request that passed its limiter.
#[derive(Debug, Serialize)]
pub struct AdmittedResponse {
    pub message: String,
    pub algorithm: Algorithm,
}

impl AdmittedResponse {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            message: format!("Request admitted by {}", algorithm),
            algorithm,
        }
    }
}

/// Body of a successful downstream call.
#[derive(Debug, Serialize)]
pub struct DependencyResponse {
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}
