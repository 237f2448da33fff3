//! Queue items, outcomes and status snapshots.

use chrono::{DateTime, Utc};
use reply_core::{ContactId, OutboundPayload};
use serde::Serialize;

/// Lifecycle of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Sent,
    Failed,
}

/// One outbound send task.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub contact: ContactId,
    pub payload: OutboundPayload,
    /// Attempts made so far.
    pub attempt: u32,
    pub status: ItemStatus,
    pub last_error: Option<String>,
    /// Free-form correlation tag, e.g. the record the message is about.
    pub tag: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

/// What happened to an item after an attempt.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Sent { item: QueueItem, message_id: String },
    /// The attempt failed and the item went back to the end of the queue.
    Retrying { item: QueueItem, error: String },
    /// The item exhausted its attempts.
    Failed { item: QueueItem, error: String },
}

impl DispatchOutcome {
    pub fn item(&self) -> &QueueItem {
        match self {
            Self::Sent { item, .. } | Self::Retrying { item, .. } | Self::Failed { item, .. } => item,
        }
    }
}

/// Short view of a waiting item.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedPreview {
    pub id: String,
    pub contact: ContactId,
    pub attempt: u32,
    pub preview: String,
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub processing: bool,
    pub in_cooldown: bool,
    pub total_sent: u64,
    pub total_failed: u64,
    pub cooldowns_triggered: u64,
    /// Percentage of finished items that were sent.
    pub success_rate: f64,
    pub next_items: Vec<QueuedPreview>,
}
