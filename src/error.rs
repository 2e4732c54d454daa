use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::resilience::PolicyError;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GateError>;

impl From<redis::RedisError> for GateError {
    fn from(err: redis::RedisError) -> Self {
        GateError::Redis(err.to_string())
    }
}

impl From<validator::ValidationErrors> for GateError {
    fn from(err: validator::ValidationErrors) -> Self {
        GateError::Validation(err.to_string())
    }
}

/// Body of every failure response. `policy` names the control that rejected
/// the request so clients can tell the backoff reasons apart.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub policy: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, policy: &'static str) -> Self {
        Self {
            error: error.into(),
            policy,
            attempts: None,
        }
    }
}

impl GateError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::Policy(PolicyError::CircuitOpen { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Policy(PolicyError::Timeout(_)) => StatusCode::REQUEST_TIMEOUT,
            GateError::Policy(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GateError::Config(_) | GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorResponse {
        match self {
            GateError::Policy(err @ PolicyError::CircuitOpen { .. }) => ErrorResponse::new(
                format!("Service temporarily unavailable: {}", err),
                err.policy(),
            ),
            GateError::Policy(err @ PolicyError::RetryExhausted { attempts, .. }) => ErrorResponse {
                attempts: Some(*attempts),
                ..ErrorResponse::new(err.to_string(), err.policy())
            },
            GateError::Policy(err) => ErrorResponse::new(err.to_string(), err.policy()),
            GateError::Redis(_) => ErrorResponse::new(self.to_string(), "store"),
            GateError::Validation(_) => ErrorResponse::new(self.to_string(), "validation"),
            GateError::Config(_) | GateError::Internal(_) => {
                ErrorResponse::new("Internal server error", "internal")
            }
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
