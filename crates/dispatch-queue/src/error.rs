//! Error types for the dispatch queue.

use thiserror::Error;

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The payload had no text.
    #[error("refusing to enqueue an empty message for {0}")]
    EmptyPayload(String),

    /// A configuration value was unusable.
    #[error("invalid value for {key}: {value}")]
    InvalidConfig { key: &'static str, value: String },

    /// Another worker is already draining this queue.
    #[error("dispatch worker already running")]
    AlreadyRunning,
}
