//! Error types for Portico Gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("service not found")]
    NotFound,

    #[error("service already registered")]
    AlreadyRegistered,

    #[error("service already registered at this address")]
    DuplicateAddress,

    #[error("no instances found for service")]
    NoInstances,

    #[error("{0}")]
    BadRequest(String),

    #[error("missing authorization token")]
    AuthMissing,

    #[error("invalid authorization header")]
    AuthMalformed,

    #[error("invalid or expired token")]
    AuthInvalid,

    // The transport detail stays out of the client-facing message; it is
    // still carried for logging via Debug.
    #[error("authentication service unavailable")]
    AuthTransport(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("no healthy instances available")]
    BackendUnavailable,

    #[error("backend request failed: {0}")]
    BackendTransport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// HTTP status this error surfaces as on the management API.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound | GatewayError::NoInstances => StatusCode::NOT_FOUND,
            GatewayError::AlreadyRegistered | GatewayError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::DuplicateAddress => StatusCode::CONFLICT,
            GatewayError::AuthMissing
            | GatewayError::AuthMalformed
            | GatewayError::AuthInvalid => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendTransport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    /// Render the error as the JSON error body used across the HTTP
    /// surface, with the status from `status_code()`.
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        GatewayError::Timeout(err.to_string())
    }
}
