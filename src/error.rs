use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ApiResponse;

/// Unified error type for the proxy pool
#[derive(Error, Debug)]
pub enum PoolError {
    // Input errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Store errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // Validation errors
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    // Ingestion errors
    #[error("Candidate source failed: {0}")]
    SourceFailed(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PoolError::InvalidArgument(_)
            | PoolError::InvalidProxyAddress(_)
            | PoolError::UnsupportedProtocol(_)
            | PoolError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            PoolError::NotFound(_) => StatusCode::NOT_FOUND,

            // 502 Bad Gateway
            PoolError::ProbeFailed(_) | PoolError::SourceFailed(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            PoolError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            PoolError::Io(_) | PoolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Whether this is a missing-key condition callers may treat as a benign race
    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::NotFound(_))
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiResponse::<()>::failure(status.as_u16(), self.to_string());

        (status, Json(body)).into_response()
    }
}

// Every SQLite failure surfaces as an unavailable store
impl From<rusqlite::Error> for PoolError {
    fn from(err: rusqlite::Error) -> Self {
        PoolError::StoreUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for PoolError {
    fn from(err: reqwest::Error) -> Self {
        PoolError::SourceFailed(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for PoolError {
    fn from(err: url::ParseError) -> Self {
        PoolError::InvalidProxyAddress(err.to_string())
    }
}

impl From<tokio::task::JoinError> for PoolError {
    fn from(err: tokio::task::JoinError) -> Self {
        PoolError::Internal(format!("blocking task failed: {}", err))
    }
}
