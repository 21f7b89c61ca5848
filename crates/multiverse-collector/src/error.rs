//! Error types for the fake collector.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Errors that can occur while running or querying the fake collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The listener could not be bound.
    #[error("failed to bind fake collector on port {port}: {source}")]
    Bind {
        /// Requested port (0 means ephemeral).
        port: u16,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The private runtime could not be created.
    #[error("failed to build collector runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// A request did not follow the wire contract.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A recorded payload did not decode into the requested view.
    #[error("failed to decode '{method}' payload: {source}")]
    Decode {
        /// Method the call was recorded under.
        method: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectorError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Decode { .. } => StatusCode::BAD_REQUEST,
            Self::Bind { .. } | Self::Runtime(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "exception": {
                "error_type": "InvalidRequest",
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
