//! Database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ContextSnapshot {
    /// Normalized contact id.
    pub contact_id: String,
    /// JSON-encoded context.
    pub snapshot: String,
    /// RFC 3339 timestamp of the last change, written by the caller.
    pub updated_at: String,
}

/// A persisted confirmation or cancellation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TrackedRecordRow {
    /// `confirmation` or `cancellation`.
    pub flow: String,
    pub record_id: String,
    pub contact_id: Option<String>,
    pub status: String,
    pub badge: Option<String>,
    /// JSON-encoded record.
    pub snapshot: String,
    pub updated_at: String,
}

/// A stored audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditRow {
    pub id: i64,
    pub kind: String,
    pub contact_id: Option<String>,
    pub record_id: Option<String>,
    pub system_message_id: Option<String>,
    pub raw_text: Option<String>,
    pub normalized_text: Option<String>,
    pub intent: Option<String>,
    pub confidence: Option<f64>,
    pub method: Option<String>,
    pub action: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub received_at: Option<String>,
    pub created_at: String,
}

/// Fields of an audit entry to insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub kind: String,
    pub contact_id: Option<String>,
    pub record_id: Option<String>,
    pub system_message_id: Option<String>,
    pub raw_text: Option<String>,
    pub normalized_text: Option<String>,
    pub intent: Option<String>,
    pub confidence: Option<f64>,
    pub method: Option<String>,
    pub action: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    /// When the triggering message reached the gateway, RFC 3339.
    pub received_at: Option<String>,
}

/// An outbound item that was given up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DispatchFailure {
    pub id: i64,
    pub item_id: String,
    pub contact_id: String,
    pub attempts: i64,
    pub error: String,
    pub created_at: String,
}
