//! Error types for gateway-client.

use reply_core::TransportError;
use thiserror::Error;

/// Errors that can occur when talking to the messaging gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the gateway.
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// The gateway accepted the request but returned no message id.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<GatewayError> for TransportError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Http(e) if e.is_timeout() => TransportError::Timeout,
            GatewayError::Http(e) => TransportError::Unavailable(e.to_string()),
            other => TransportError::Rejected(other.to_string()),
        }
    }
}
