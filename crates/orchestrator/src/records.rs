//! Confirmation and cancellation records tracked through their flows.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use database::fingerprint as fingerprint_store;
use database::record as record_store;
use database::{Database, TrackedRecordRow};
use reply_core::{
    specialty_matches, AppointmentEvent, Clock, ContactId, FlowType, Intent, PatientIdentity,
    ReplyTemplates, SystemClock,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::transitions::{self, can_transition, Badge, RecordStatus, TransitionOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One appointment followed through a confirmation or cancellation flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRecord {
    pub flow: FlowType,
    pub record_id: String,
    pub status: RecordStatus,
    pub badge: Option<Badge>,
    pub patient: PatientIdentity,
    pub patient_name: Option<String>,
    pub specialty: String,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub contact: Option<ContactId>,
    pub responded_at: Option<DateTime<Utc>>,
    /// The current status came from a conversational reply.
    #[serde(default)]
    pub replied_via_chat: bool,
    /// New appointment that replaced this one.
    #[serde(default)]
    pub linked_to: Option<String>,
    /// Appointment this one replaced.
    #[serde(default)]
    pub rescheduled_from: Option<String>,
    /// The new-date confirmation for this record's replacement was sent.
    #[serde(default)]
    pub new_date_notified: bool,
    pub updated_at: DateTime<Utc>,
}

impl TrackedRecord {
    pub fn from_event(flow: FlowType, event: &AppointmentEvent, now: DateTime<Utc>) -> Self {
        Self {
            flow,
            record_id: event.record_id.clone(),
            status: RecordStatus::Pending,
            badge: None,
            patient: event.patient.clone(),
            patient_name: event.patient_name.clone(),
            specialty: event.specialty.clone(),
            scheduled_at: event.scheduled_at,
            created_at: event.created_at,
            cancelled_at: event.cancelled_at,
            contact: event.contact(),
            responded_at: None,
            replied_via_chat: false,
            linked_to: None,
            rescheduled_from: None,
            new_date_notified: false,
            updated_at: now,
        }
    }

    /// Name to greet the patient with.
    pub fn display_name(&self) -> &str {
        self.patient_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
            .unwrap_or("")
    }

    fn to_row(&self) -> serde_json::Result<TrackedRecordRow> {
        let snapshot = serde_json::to_string(self)?;
        Ok(TrackedRecordRow {
            flow: self.flow.as_str().to_string(),
            record_id: self.record_id.clone(),
            contact_id: self.contact.as_ref().map(|c| c.to_string()),
            status: self.status.as_str().to_string(),
            badge: self.badge.map(|b| b.as_str().to_string()),
            snapshot,
            updated_at: self.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

/// Change notifications for subscribers (dashboards, tests).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordEvent {
    Created {
        flow: FlowType,
        record_id: String,
    },
    StatusChanged {
        flow: FlowType,
        record_id: String,
        from: RecordStatus,
        to: RecordStatus,
        at: DateTime<Utc>,
    },
    BadgeChanged {
        flow: FlowType,
        record_id: String,
        from: Option<Badge>,
        to: Badge,
        at: DateTime<Utc>,
    },
}

type RecordKey = (FlowType, String);

fn key(flow: FlowType, record_id: &str) -> RecordKey {
    (flow, record_id.to_string())
}

/// SHA-256 fingerprint of an event, used to drop connector repeats.
pub fn event_fingerprint(kind: &str, event: &AppointmentEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"|");
    hasher.update(event.dedup_key().as_bytes());
    hex::encode(hasher.finalize())
}

/// All tracked records, keyed by flow and record id.
///
/// Every mutation happens under one write lock, so a transition is atomic per
/// record. Optionally backed by SQLite.
pub struct RecordBook {
    records: RwLock<HashMap<RecordKey, TrackedRecord>>,
    fingerprints: RwLock<HashSet<String>>,
    events: broadcast::Sender<RecordEvent>,
    clock: Arc<dyn Clock>,
    database: Option<Database>,
}

impl Default for RecordBook {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBook {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            fingerprints: RwLock::new(HashSet::new()),
            events,
            clock: Arc::new(SystemClock),
            database: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Subscribe to record changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RecordEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn persist(&self, record: &TrackedRecord) {
        let Some(database) = &self.database else {
            return;
        };
        let row = match record.to_row() {
            Ok(row) => row,
            Err(err) => {
                warn!(record = %record.record_id, "Failed to encode record: {}", err);
                return;
            }
        };
        if let Err(err) = record_store::upsert_record(database.pool(), &row).await {
            warn!(record = %record.record_id, "Failed to persist record: {}", err);
        }
    }

    /// Remember an event. Returns `false` if it was already seen.
    pub async fn register_fingerprint(&self, kind: &str, event: &AppointmentEvent) -> bool {
        let fingerprint = event_fingerprint(kind, event);
        if !self.fingerprints.write().await.insert(fingerprint.clone()) {
            return false;
        }

        if let Some(database) = &self.database {
            match fingerprint_store::insert_if_new(database.pool(), &fingerprint, &event.record_id, kind)
                .await
            {
                Ok(is_new) => return is_new,
                Err(err) => warn!(record = %event.record_id, "Failed to persist fingerprint: {}", err),
            }
        }
        true
    }

    /// Insert a record unless one already exists; returns the stored record.
    pub async fn insert(&self, record: TrackedRecord) -> TrackedRecord {
        let stored = {
            let mut records = self.records.write().await;
            let entry = records.entry(key(record.flow, &record.record_id));
            match entry {
                std::collections::hash_map::Entry::Occupied(existing) => {
                    return existing.get().clone();
                }
                std::collections::hash_map::Entry::Vacant(slot) => slot.insert(record).clone(),
            }
        };

        debug!(record = %stored.record_id, "Tracking {} record", stored.flow);
        self.persist(&stored).await;
        self.emit(RecordEvent::Created {
            flow: stored.flow,
            record_id: stored.record_id.clone(),
        });
        stored
    }

    pub async fn get(&self, flow: FlowType, record_id: &str) -> Result<TrackedRecord> {
        if let Some(record) = self.records.read().await.get(&key(flow, record_id)) {
            return Ok(record.clone());
        }

        if let Some(database) = &self.database {
            match record_store::get_record(database.pool(), flow.as_str(), record_id).await {
                Ok(row) => match serde_json::from_str::<TrackedRecord>(&row.snapshot) {
                    Ok(record) => {
                        self.records
                            .write()
                            .await
                            .entry(key(flow, record_id))
                            .or_insert_with(|| record.clone());
                        return Ok(record);
                    }
                    Err(err) => warn!(record = %record_id, "Unreadable record snapshot: {}", err),
                },
                Err(database::DatabaseError::NotFound { .. }) => {}
                Err(err) => warn!(record = %record_id, "Failed to load record: {}", err),
            }
        }

        Err(OrchestratorError::RecordNotFound {
            flow,
            record_id: record_id.to_string(),
        })
    }

    pub async fn list(&self) -> Vec<TrackedRecord> {
        let mut records: Vec<TrackedRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    pub async fn list_by_badge(&self, badge: Badge) -> Vec<TrackedRecord> {
        let mut records: Vec<TrackedRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.badge == Some(badge))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        records
    }

    /// Cancellation records of this patient and specialty cancelled within
    /// `window` and not yet linked to a new appointment, oldest first.
    pub async fn recent_unlinked_cancellations(
        &self,
        patient: &PatientIdentity,
        specialty: &str,
        window: Duration,
    ) -> Vec<TrackedRecord> {
        let now = self.clock.now();
        let mut records: Vec<TrackedRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.flow == FlowType::Cancellation && r.linked_to.is_none())
            .filter(|r| r.patient.matches(patient) && specialty_matches(&r.specialty, specialty))
            .filter(|r| {
                let cancelled = r.cancelled_at.unwrap_or(r.updated_at);
                now - cancelled <= window
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.cancelled_at.unwrap_or(r.updated_at));
        records
    }

    /// Apply a patient reply to a record.
    pub async fn apply_intent(
        &self,
        flow: FlowType,
        record_id: &str,
        intent: Intent,
        templates: &ReplyTemplates,
    ) -> Result<(TrackedRecord, TransitionOutcome)> {
        // Make sure a persisted record is in memory before taking the lock.
        self.get(flow, record_id).await?;
        let now = self.clock.now();

        let (updated, outcome, previous) = {
            let mut records = self.records.write().await;
            let record = records.get_mut(&key(flow, record_id)).ok_or_else(|| {
                OrchestratorError::RecordNotFound {
                    flow,
                    record_id: record_id.to_string(),
                }
            })?;

            let outcome = transitions::apply(flow, record_id, record.status, intent, templates)?;
            let previous = (record.status, record.badge);
            record.status = outcome.new_status;
            if outcome.badge.is_some() {
                record.badge = outcome.badge;
            }
            record.responded_at = Some(now);
            record.replied_via_chat = true;
            record.updated_at = now;
            (record.clone(), outcome, previous)
        };

        info!(
            record = %record_id,
            "{} record {} -> {}",
            flow,
            previous.0,
            updated.status
        );
        self.persist(&updated).await;
        self.emit(RecordEvent::StatusChanged {
            flow,
            record_id: record_id.to_string(),
            from: previous.0,
            to: updated.status,
            at: now,
        });
        if let Some(badge) = outcome.badge {
            self.emit(RecordEvent::BadgeChanged {
                flow,
                record_id: record_id.to_string(),
                from: previous.1,
                to: badge,
                at: now,
            });
        }

        Ok((updated, outcome))
    }

    /// Move a pending-action badge to its resolution.
    ///
    /// `Cancelled` additionally requires that the badge was raised by a
    /// conversational reply.
    pub async fn resolve_badge(
        &self,
        flow: FlowType,
        record_id: &str,
        to: Badge,
    ) -> Result<TrackedRecord> {
        self.get(flow, record_id).await?;
        let now = self.clock.now();

        let (updated, from) = {
            let mut records = self.records.write().await;
            let record = records.get_mut(&key(flow, record_id)).ok_or_else(|| {
                OrchestratorError::RecordNotFound {
                    flow,
                    record_id: record_id.to_string(),
                }
            })?;

            let from = record.badge.ok_or_else(|| OrchestratorError::TransitionRejected {
                record_id: record_id.to_string(),
                reason: format!("record has no badge to resolve to {}", to.label()),
            })?;
            if !can_transition(from, to) {
                return Err(OrchestratorError::TransitionRejected {
                    record_id: record_id.to_string(),
                    reason: format!("badge {} cannot become {}", from.label(), to.label()),
                });
            }
            if to == Badge::Cancelled && !record.replied_via_chat {
                return Err(OrchestratorError::TransitionRejected {
                    record_id: record_id.to_string(),
                    reason: "badge was not raised by a patient reply".to_string(),
                });
            }

            record.badge = Some(to);
            record.updated_at = now;
            (record.clone(), from)
        };

        info!(record = %record_id, "Badge {} -> {}", from.label(), to.label());
        self.persist(&updated).await;
        self.emit(RecordEvent::BadgeChanged {
            flow,
            record_id: record_id.to_string(),
            from: Some(from),
            to,
            at: now,
        });
        Ok(updated)
    }

    /// Record that the appointment was cancelled in the scheduling system.
    ///
    /// Status changes that do not come from a reply never raise a badge. A
    /// record already answered keeps its status.
    pub async fn mark_cancelled_in_source(
        &self,
        flow: FlowType,
        record_id: &str,
        cancelled_at: DateTime<Utc>,
    ) -> Result<TrackedRecord> {
        self.get(flow, record_id).await?;
        let now = self.clock.now();

        let (updated, previous) = {
            let mut records = self.records.write().await;
            let record = records.get_mut(&key(flow, record_id)).ok_or_else(|| {
                OrchestratorError::RecordNotFound {
                    flow,
                    record_id: record_id.to_string(),
                }
            })?;
            let previous = record.status;
            record.cancelled_at = Some(cancelled_at);
            if record.status == RecordStatus::Pending {
                record.status = RecordStatus::Cancelled;
            }
            record.updated_at = now;
            (record.clone(), previous)
        };

        self.persist(&updated).await;
        if previous != updated.status {
            self.emit(RecordEvent::StatusChanged {
                flow,
                record_id: record_id.to_string(),
                from: previous,
                to: updated.status,
                at: now,
            });
        }
        Ok(updated)
    }

    /// Bind an original appointment to the one that replaced it.
    pub async fn link(
        &self,
        original_record_id: &str,
        new_record_id: &str,
        new_date_notified: bool,
    ) -> Result<TrackedRecord> {
        self.get(FlowType::Cancellation, original_record_id).await?;
        let now = self.clock.now();

        let updated = {
            let mut records = self.records.write().await;
            if let Some(new_record) =
                records.get_mut(&key(FlowType::Confirmation, new_record_id))
            {
                new_record.rescheduled_from = Some(original_record_id.to_string());
                new_record.updated_at = now;
            }

            let original = records
                .get_mut(&key(FlowType::Cancellation, original_record_id))
                .ok_or_else(|| OrchestratorError::RecordNotFound {
                    flow: FlowType::Cancellation,
                    record_id: original_record_id.to_string(),
                })?;
            original.linked_to = Some(new_record_id.to_string());
            original.new_date_notified |= new_date_notified;
            original.updated_at = now;
            original.clone()
        };

        self.persist(&updated).await;
        if let Ok(new_record) = self.get(FlowType::Confirmation, new_record_id).await {
            self.persist(&new_record).await;
        }
        Ok(updated)
    }

    /// Load every persisted record into memory.
    pub async fn load_all(&self) -> Result<usize> {
        let Some(database) = &self.database else {
            return Ok(0);
        };
        let rows = record_store::list_records(database.pool()).await?;
        let mut records = self.records.write().await;
        let mut loaded = 0;
        for row in rows {
            match serde_json::from_str::<TrackedRecord>(&row.snapshot) {
                Ok(record) => {
                    records.insert(key(record.flow, &record.record_id), record);
                    loaded += 1;
                }
                Err(err) => warn!("Skipping unreadable record {}: {}", row.record_id, err),
            }
        }
        info!("Loaded {} tracked records", loaded);
        Ok(loaded)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(record_id: &str) -> AppointmentEvent {
        AppointmentEvent {
            record_id: record_id.to_string(),
            patient: PatientIdentity::new(Some("P".to_string()), None),
            patient_name: Some("Maria Silva".to_string()),
            specialty: "Cardiology".to_string(),
            scheduled_at: Utc.with_ymd_and_hms(2026, 3, 10, 13, 0, 0).unwrap(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            cancelled_at: None,
            phones: vec!["11987654321".to_string()],
        }
    }

    #[tokio::test]
    async fn test_fingerprint_dedup() {
        let book = RecordBook::new();
        assert!(book.register_fingerprint("appointment_created", &event("R1")).await);
        assert!(!book.register_fingerprint("appointment_created", &event("R1")).await);
        assert!(book.register_fingerprint("appointment_cancelled", &event("R1")).await);
        assert_eq!(
            event_fingerprint("appointment_created", &event("R1")).len(),
            64
        );
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let book = RecordBook::new();
        let record = TrackedRecord::from_event(FlowType::Confirmation, &event("R1"), Utc::now());
        book.insert(record.clone()).await;
        book.insert(record).await;
        assert_eq!(book.len().await, 1);
        assert_eq!(
            book.get(FlowType::Confirmation, "R1").await.unwrap().display_name(),
            "Maria"
        );
        assert!(matches!(
            book.get(FlowType::Cancellation, "R1").await,
            Err(OrchestratorError::RecordNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_intent_emits_events() {
        let book = RecordBook::new();
        let mut events = book.subscribe();
        let templates = ReplyTemplates::default();
        book.insert(TrackedRecord::from_event(FlowType::Confirmation, &event("R1"), Utc::now()))
            .await;

        let (record, outcome) = book
            .apply_intent(FlowType::Confirmation, "R1", Intent::Declined, &templates)
            .await
            .unwrap();
        assert_eq!(record.status, RecordStatus::Declined);
        assert_eq!(record.badge, Some(Badge::CancelInSource));
        assert!(record.replied_via_chat);
        assert_eq!(outcome.badge, Some(Badge::CancelInSource));

        assert!(matches!(events.recv().await.unwrap(), RecordEvent::Created { .. }));
        assert!(matches!(events.recv().await.unwrap(), RecordEvent::StatusChanged { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            RecordEvent::BadgeChanged { to: Badge::CancelInSource, .. }
        ));

        let again = book
            .apply_intent(FlowType::Confirmation, "R1", Intent::Confirmed, &templates)
            .await;
        assert!(matches!(again, Err(OrchestratorError::TransitionRejected { .. })));
    }

    #[tokio::test]
    async fn test_resolve_badge_is_monotonic() {
        let book = RecordBook::new();
        let templates = ReplyTemplates::default();
        book.insert(TrackedRecord::from_event(FlowType::Confirmation, &event("R1"), Utc::now()))
            .await;
        book.apply_intent(FlowType::Confirmation, "R1", Intent::Declined, &templates)
            .await
            .unwrap();

        let resolved = book
            .resolve_badge(FlowType::Confirmation, "R1", Badge::Cancelled)
            .await
            .unwrap();
        assert_eq!(resolved.badge, Some(Badge::Cancelled));

        let back = book
            .resolve_badge(FlowType::Confirmation, "R1", Badge::CancelInSource)
            .await;
        assert!(back.is_err());
    }

    #[tokio::test]
    async fn test_self_service_cancellation_has_no_badge() {
        let book = RecordBook::new();
        book.insert(TrackedRecord::from_event(FlowType::Confirmation, &event("R1"), Utc::now()))
            .await;

        let record = book
            .mark_cancelled_in_source(FlowType::Confirmation, "R1", Utc::now())
            .await
            .unwrap();
        assert_eq!(record.status, RecordStatus::Cancelled);
        assert_eq!(record.badge, None);

        let resolve = book
            .resolve_badge(FlowType::Confirmation, "R1", Badge::Cancelled)
            .await;
        assert!(resolve.is_err());
    }

    #[tokio::test]
    async fn test_records_persist() {
        let db = Database::connect_with_pool_size("sqlite::memory:", 1).await.unwrap();
        db.migrate().await.unwrap();

        let book = RecordBook::new().with_database(db.clone());
        book.insert(TrackedRecord::from_event(FlowType::Confirmation, &event("R1"), Utc::now()))
            .await;
        assert!(book.register_fingerprint("appointment_created", &event("R1")).await);

        let restarted = RecordBook::new().with_database(db);
        assert!(restarted.get(FlowType::Confirmation, "R1").await.is_ok());
        assert!(!restarted.register_fingerprint("appointment_created", &event("R1")).await);
        assert_eq!(restarted.load_all().await.unwrap(), 1);
    }
}
