//! Append-only audit log and derived counters.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database::audit as audit_store;
use database::{Database, NewAuditEntry};
use reply_core::{ConfidenceBand, ContactId, IntentClassification};
use serde::Serialize;
use tracing::{info, warn};

const DEFAULT_CAPACITY: usize = 10_000;

/// Action recorded for an outbound item the gateway accepted.
pub const DISPATCH_SENT: &str = "dispatch_sent";
/// Action recorded for an outbound item that exhausted its attempts.
pub const DISPATCH_FAILED: &str = "dispatch_failed";

/// What an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// One pass of the inbound pipeline.
    Inbound,
    /// A message the core decided to send on its own (intake, linker).
    Outbound,
    /// A link between a new appointment and an earlier cancellation.
    Link,
    /// Something that should not happen: rejected transitions, missing
    /// records, ambiguous links.
    Integrity,
    /// An operator action.
    Override,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Link => "link",
            Self::Integrity => "integrity",
            Self::Override => "override",
        }
    }
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub contact: Option<ContactId>,
    pub record_id: Option<String>,
    pub system_message_id: Option<String>,
    pub raw_text: Option<String>,
    pub classification: Option<IntentClassification>,
    pub band: Option<ConfidenceBand>,
    pub action: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    /// When the triggering message reached the gateway.
    pub received_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(kind: AuditKind, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            contact: None,
            record_id: None,
            system_message_id: None,
            raw_text: None,
            classification: None,
            band: None,
            action: None,
            success: true,
            error: None,
            received_at: None,
            at,
        }
    }

    pub fn contact(mut self, contact: &ContactId) -> Self {
        self.contact = Some(contact.clone());
        self
    }

    pub fn record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    fn to_row(&self) -> NewAuditEntry {
        NewAuditEntry {
            kind: self.kind.as_str().to_string(),
            contact_id: self.contact.as_ref().map(|c| c.to_string()),
            record_id: self.record_id.clone(),
            system_message_id: self.system_message_id.clone(),
            raw_text: self.raw_text.clone(),
            normalized_text: self
                .classification
                .as_ref()
                .filter(|c| !c.normalized_text.is_empty())
                .map(|c| c.normalized_text.clone()),
            intent: self
                .classification
                .as_ref()
                .map(|c| c.intent.as_str().to_string()),
            confidence: self.classification.as_ref().map(|c| c.confidence),
            method: self
                .classification
                .as_ref()
                .map(|c| c.method.as_str().to_string()),
            action: self.action.clone(),
            success: self.success,
            error: self.error.clone(),
            received_at: self.received_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Counters derived from the audit stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditMetrics {
    pub total_entries: u64,
    pub inbound_processed: u64,
    pub failures: u64,
    pub ambiguity_detected: u64,
    pub integrity_warnings: u64,
    pub dispatch_failed: u64,
    pub by_action: BTreeMap<String, u64>,
    pub by_band: BTreeMap<String, u64>,
    pub by_method: BTreeMap<String, u64>,
    pub by_intent: BTreeMap<String, u64>,
}

impl AuditMetrics {
    fn observe(&mut self, entry: &AuditEntry) {
        self.total_entries += 1;
        if !entry.success {
            self.failures += 1;
        }
        match entry.kind {
            AuditKind::Inbound => self.inbound_processed += 1,
            AuditKind::Integrity => self.integrity_warnings += 1,
            _ => {}
        }
        if let Some(action) = &entry.action {
            *self.by_action.entry(action.clone()).or_default() += 1;
            match action.as_str() {
                "ambiguity_clarification" => self.ambiguity_detected += 1,
                DISPATCH_FAILED if entry.kind == AuditKind::Outbound => {
                    self.dispatch_failed += 1
                }
                _ => {}
            }
        }
        if let Some(band) = entry.band {
            *self.by_band.entry(band.as_str().to_string()).or_default() += 1;
        }
        if let Some(classification) = &entry.classification {
            *self
                .by_method
                .entry(classification.method.as_str().to_string())
                .or_default() += 1;
            *self
                .by_intent
                .entry(classification.intent.as_str().to_string())
                .or_default() += 1;
        }
    }
}

/// Destination for audit entries.
///
/// Recording never fails from the caller's point of view; sinks log their own
/// errors.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);

    /// Counters so far. Sinks that keep none return zeros.
    async fn metrics(&self) -> AuditMetrics {
        AuditMetrics::default()
    }

    fn name(&self) -> &str {
        "audit"
    }
}

/// Writes entries to the log only.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        info!(
            kind = entry.kind.as_str(),
            contact = entry.contact.as_ref().map(|c| c.as_str()).unwrap_or("-"),
            record = entry.record_id.as_deref().unwrap_or("-"),
            success = entry.success,
            "audit: {}",
            entry.action.as_deref().unwrap_or("-")
        );
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Keeps recent entries and counters in memory, and appends every entry to
/// the database when one is configured.
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    metrics: Mutex<AuditMetrics>,
    capacity: usize,
    database: Option<Database>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(AuditMetrics::default()),
            capacity: DEFAULT_CAPACITY,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Keep at most `capacity` entries in memory.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// In-memory entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn entries_for(&self, contact: &ContactId) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.contact.as_ref() == Some(contact))
            .collect()
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn record(&self, entry: AuditEntry) {
        if entry.kind == AuditKind::Integrity {
            warn!(
                record = entry.record_id.as_deref().unwrap_or("-"),
                "Integrity warning: {}",
                entry.error.as_deref().unwrap_or("-")
            );
        }

        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .observe(&entry);

        let row = self.database.as_ref().map(|_| entry.to_row());
        {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }

        if let (Some(database), Some(row)) = (&self.database, row) {
            if let Err(err) = audit_store::insert_entry(database.pool(), &row).await {
                warn!("Failed to persist audit entry: {}", err);
            }
        }
    }

    async fn metrics(&self) -> AuditMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn name(&self) -> &str {
        "audit-log"
    }
}
