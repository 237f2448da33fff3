//! Error types for the conversation store.

use database::DatabaseError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Persistence failed.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// A snapshot could not be encoded or decoded.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// No reschedule request with this id exists for the contact.
    #[error("reschedule request not found: {0}")]
    RequestNotFound(String),

    /// The request was already fulfilled or cancelled.
    #[error("reschedule request {0} is no longer pending")]
    RequestClosed(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
