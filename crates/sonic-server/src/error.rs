//! Error types for the log viewer server.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sonic_store::StoreError;
use thiserror::Error;

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the log viewer server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// The request could not be decoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The viewer limit has been reached.
    #[error("too many viewers: limit is {0}")]
    TooManyViewers(usize),

    /// The broadcast hub has stopped.
    #[error("broadcast hub unavailable")]
    HubUnavailable,

    /// A storage operation failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::TooManyViewers(_) => (StatusCode::SERVICE_UNAVAILABLE, "too_many_viewers"),
            Self::BindFailed(_, _)
            | Self::HubUnavailable
            | Self::Store(_)
            | Self::Config(_)
            | Self::WebSocket(_)
            | Self::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":"internal_error","message":"failed to serialize error"}"#.to_string()
        });

        (status, [("content-type", "application/json")], json).into_response()
    }
}
