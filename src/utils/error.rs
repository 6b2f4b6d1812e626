//! Error handling module
//!
//! Defines the proxy error taxonomy. Only routing and upstream connectivity
//! errors ever reach the caller; parsing and persistence errors stay on the
//! observation side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Proxy error types
#[derive(Error, Debug)]
pub enum ProxyError {
    /// No mount point matches the request path
    #[error("no upstream route for path: {0}")]
    RouteNotFound(String),

    /// Connection to the upstream could not be established
    #[error("cannot connect to upstream: {0}")]
    UpstreamUnreachable(String),

    /// Upstream did not answer in time
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Upstream body could not be recognized by the usage parser
    #[error("unrecognized upstream payload: {0}")]
    UpstreamProtocolError(String),

    /// Record sink could not accept a record
    #[error("usage record not persisted: {0}")]
    PersistenceUnavailable(String),

    /// Inbound request could not be read
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

/// Error body returned to the caller
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl ProxyError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamProtocolError(_)
            | ProxyError::PersistenceUnavailable(_)
            | ProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::RouteNotFound(_) => "not_found_error",
            ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::UpstreamProtocolError(_) => "upstream_protocol_error",
            ProxyError::PersistenceUnavailable(_) => "persistence_unavailable",
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::Config(_) => "api_error",
        }
    }

    /// Whether the error is visible to the caller at all
    pub fn is_caller_visible(&self) -> bool {
        !matches!(
            self,
            ProxyError::UpstreamProtocolError(_) | ProxyError::PersistenceUnavailable(_)
        )
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            response_type: "error".to_string(),
            error: ErrorDetail {
                error_type: self.error_type().to_string(),
                message: format!("tokenwatch: {}", self),
            },
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("Proxy error: {} - Status code: {}", self, status);
        } else {
            tracing::warn!("Client error: {} - Status code: {}", self, status);
        }

        (status, Json(self.to_error_response())).into_response()
    }
}

/// Result type alias
pub type ProxyResult<T> = Result<T, ProxyError>;
