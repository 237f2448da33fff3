//! Error types shared across the workspace.

use thiserror::Error;

/// Errors raised while validating boundary input or configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A contact identifier could not be normalized.
    #[error("invalid contact id: {0}")]
    InvalidContact(String),

    /// A scheduling or inbound event failed validation.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// An environment variable held an unusable value.
    #[error("invalid value for {key}: {value}")]
    InvalidConfig { key: &'static str, value: String },
}

/// Errors that can occur while classifying an inbound message.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The classifier is temporarily unavailable.
    #[error("classification unavailable: {0}")]
    Unavailable(String),

    /// The classifier did not answer in time.
    #[error("classification timed out")]
    Timeout,

    /// The input could not be classified at all.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Errors returned by a messaging transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel could not be reached.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The channel refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The send did not complete in time.
    #[error("send timed out")]
    Timeout,
}
