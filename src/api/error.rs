//! Request-level errors rendered in the wire shapes OpenAI clients expect.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Failures surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The admission gate is held, or the extension is busy.
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    /// No agent attached (or the command could not be handed to it).
    #[error("{0}")]
    ServiceUnavailable(String),
    /// Task failure or timeout.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => error!(message = %msg, "request failed"),
            ApiError::ServiceUnavailable(msg) => warn!(message = %msg, "extension unavailable"),
            _ => tracing::debug!(message = %message, "client error"),
        }

        // 401/429 carry the structured OpenAI error object so SDKs classify
        // them; the rest keep the bare string shape.
        let body = match &self {
            ApiError::RateLimited(_) => json!({
                "error": {"message": message, "type": "rate_limit_error"}
            }),
            ApiError::Unauthorized(_) => json!({
                "error": {"message": message, "type": "authentication_error"}
            }),
            _ => json!({"error": message}),
        };

        (status, Json(body)).into_response()
    }
}
