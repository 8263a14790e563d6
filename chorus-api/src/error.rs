//! Error types for chorus-api
//!
//! One taxonomy shared by the intake, the orchestrator and the HTTP
//! handlers. Every variant maps to a status code and a short message;
//! storage and generator details are logged, never returned.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chorus_common::api::ErrorResponse;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// No valid identity presented (401)
    #[error("Unauthorized")]
    Unauthorized,

    /// Identity known but not permitted (403)
    #[error("{0}")]
    Forbidden(String),

    /// Shape or length validation failed (400)
    #[error("{0}")]
    InvalidInput(String),

    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Problem is in the wrong status for the operation (400)
    #[error("{0}")]
    InvalidState(String),

    /// Per-identifier limit hit (429)
    #[error("Too many requests. Please try again later.")]
    RateLimited { retry_after: Duration },

    /// One contribution per user per problem (400)
    #[error("You have already contributed to this problem")]
    DuplicateContribution,

    /// Synthesis requested with zero eligible contributions (400)
    #[error("No contributions to synthesise")]
    NoContributions,

    /// Generator or persistence failure during synthesis (500)
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Content safety gate unreachable under the fail-closed policy (503)
    #[error("Content safety check unavailable: {reason}")]
    SafetyUnavailable { reason: String, retry_after: Duration },

    /// Generic persistence error (500)
    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::InvalidInput(_)
            | ApiError::InvalidState(_)
            | ApiError::DuplicateContribution
            | ApiError::NoContributions => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::SafetyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::SynthesisFailed(_) | ApiError::StorageFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show the caller
    fn public_message(&self) -> String {
        match self {
            ApiError::SynthesisFailed(_) => "Failed to synthesise contributions".to_string(),
            ApiError::SafetyUnavailable { .. } => {
                "Content safety check is temporarily unavailable. Please try again shortly."
                    .to_string()
            }
            ApiError::StorageFailure(_) => "Failed to process request".to_string(),
            other => other.to_string(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after }
            | ApiError::SafetyUnavailable { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Whole seconds, rounded up, never below one
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let millis = retry_after.as_millis();
    let secs = millis.div_ceil(1000);
    u64::try_from(secs).unwrap_or(u64::MAX).max(1)
}

impl From<chorus_common::Error> for ApiError {
    fn from(err: chorus_common::Error) -> Self {
        match err {
            chorus_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            chorus_common::Error::InvalidInput(msg) => ApiError::InvalidInput(msg),
            other => ApiError::StorageFailure(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::StorageFailure(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {}", self);
        }

        let mut response =
            (status, Json(ErrorResponse::new(self.public_message()))).into_response();

        if let Some(retry_after) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Result type for API handlers and services
pub type ApiResult<T> = Result<T, ApiError>;
