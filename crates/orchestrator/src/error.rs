//! Error types for orchestrator operations.

use conversation_store::StoreError;
use database::DatabaseError;
use dispatch_queue::QueueError;
use reply_core::{ClassifierError, FlowType};
use thiserror::Error;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The classifier failed or did not answer in time.
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(#[from] ClassifierError),

    /// The reply does not answer the pending message's flow.
    #[error("intent {intent} does not answer a {flow} message")]
    IncompatibleIntent { intent: String, flow: FlowType },

    /// No tracked record with this id.
    #[error("{flow} record not found: {record_id}")]
    RecordNotFound { flow: FlowType, record_id: String },

    /// The record cannot move the way that was asked.
    #[error("transition rejected for {record_id}: {reason}")]
    TransitionRejected { record_id: String, reason: String },

    /// A message could not be queued.
    #[error("dispatch failed: {0}")]
    DispatchFailed(#[from] QueueError),

    /// More than one reschedule request could claim the same appointment.
    #[error("ambiguous link for {appointment_id}: {candidates} candidates")]
    AmbiguousLink {
        appointment_id: String,
        candidates: usize,
    },

    /// Conversation store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Persistence failure.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl OrchestratorError {
    /// Short machine-readable kind, used in audit entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClassificationUnavailable(_) => "classification_unavailable",
            Self::IncompatibleIntent { .. } => "incompatible_intent",
            Self::RecordNotFound { .. } => "record_not_found",
            Self::TransitionRejected { .. } => "transition_rejected",
            Self::DispatchFailed(_) => "dispatch_failed",
            Self::AmbiguousLink { .. } => "ambiguous_link",
            Self::Store(_) => "store",
            Self::Database(_) => "database",
        }
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
