//! Keyed store of conversation contexts with one writer per contact.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use database::context as context_store;
use database::Database;
use reply_core::{
    Clock, ContactId, IntentClassification, PatientIdentity, SystemClock, SystemMessage,
    TimeWindows,
};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::context::{AmbiguityCheck, ConversationContext, RescheduleRequest};
use crate::error::Result;

type Slot = Arc<Mutex<ConversationContext>>;

/// Counters over every context currently in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_contexts: usize,
    pub with_pending: usize,
    pub with_ambiguity: usize,
    pub with_reschedule: usize,
}

/// Exclusive access to one contact's context.
///
/// Holding a session blocks every other writer for that contact. Changes are
/// made on a working copy: [`ContactSession::commit`] applies them and writes
/// them to the database, while dropping the session (or calling
/// [`ContactSession::discard`]) leaves the stored context untouched.
pub struct ContactSession {
    guard: OwnedMutexGuard<ConversationContext>,
    working: ConversationContext,
    database: Option<Database>,
    now: DateTime<Utc>,
}

impl ContactSession {
    fn open(
        guard: OwnedMutexGuard<ConversationContext>,
        database: Option<Database>,
        now: DateTime<Utc>,
    ) -> Self {
        let working = guard.clone();
        Self {
            guard,
            working,
            database,
            now,
        }
    }

    /// Time the session was opened, as seen by the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// The context as last committed, without this session's changes.
    pub fn saved(&self) -> &ConversationContext {
        &self.guard
    }

    /// Apply the changes, persist the context and release the lock.
    pub async fn commit(self) {
        let Self {
            mut guard,
            working,
            database,
            ..
        } = self;
        *guard = working;
        if let Some(database) = &database {
            persist(database, &guard).await;
        }
    }

    /// Drop the changes and release the lock.
    pub fn discard(self) {
        debug!(contact = %self.working.contact, "Discarding context changes");
    }
}

impl Deref for ContactSession {
    type Target = ConversationContext;

    fn deref(&self) -> &Self::Target {
        &self.working
    }
}

impl DerefMut for ContactSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.working
    }
}

async fn persist(database: &Database, context: &ConversationContext) {
    let snapshot = match serde_json::to_string(context) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(contact = %context.contact, "Failed to encode context: {}", err);
            return;
        }
    };
    let updated_at = context.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true);

    if let Err(err) = context_store::upsert_context(
        database.pool(),
        context.contact.as_str(),
        &snapshot,
        &updated_at,
    )
    .await
    {
        warn!(contact = %context.contact, "Failed to persist context: {}", err);
    }
}

/// Per-contact conversation state.
///
/// Reads and writes for different contacts proceed in parallel; all access to
/// one contact is serialized through its own lock. Optionally backed by SQLite
/// so contexts survive restarts.
pub struct ConversationStore {
    contexts: RwLock<HashMap<ContactId, Slot>>,
    windows: TimeWindows,
    clock: Arc<dyn Clock>,
    database: Option<Database>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(TimeWindows::default())
    }
}

impl ConversationStore {
    pub fn new(windows: TimeWindows) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            windows,
            clock: Arc::new(SystemClock),
            database: None,
        }
    }

    /// Use another time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Back the store with a database.
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn windows(&self) -> &TimeWindows {
        &self.windows
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn load(&self, contact: &ContactId) -> Option<ConversationContext> {
        let database = self.database.as_ref()?;
        match context_store::get_context(database.pool(), contact.as_str()).await {
            Ok(Some(row)) => match serde_json::from_str(&row.snapshot) {
                Ok(context) => Some(context),
                Err(err) => {
                    warn!(contact = %contact, "Discarding unreadable context snapshot: {}", err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(contact = %contact, "Failed to load context: {}", err);
                None
            }
        }
    }

    async fn slot(&self, contact: &ContactId, create: bool) -> Option<Slot> {
        if let Some(slot) = self.contexts.read().await.get(contact) {
            return Some(slot.clone());
        }

        let mut contexts = self.contexts.write().await;
        if let Some(slot) = contexts.get(contact) {
            return Some(slot.clone());
        }

        let context = match self.load(contact).await {
            Some(context) => context,
            None if create => {
                debug!(contact = %contact, "Creating conversation context");
                ConversationContext::new(contact.clone(), self.clock.now())
            }
            None => return None,
        };

        let slot = Arc::new(Mutex::new(context));
        contexts.insert(contact.clone(), slot.clone());
        Some(slot)
    }

    /// Lock a contact's context, creating it if needed.
    pub async fn session(&self, contact: &ContactId) -> ContactSession {
        let slot = match self.slot(contact, true).await {
            Some(slot) => slot,
            None => Arc::new(Mutex::new(ConversationContext::new(
                contact.clone(),
                self.clock.now(),
            ))),
        };
        ContactSession::open(slot.lock_owned().await, self.database.clone(), self.clock.now())
    }

    /// Lock a contact's context only if one exists.
    pub async fn existing_session(&self, contact: &ContactId) -> Option<ContactSession> {
        let slot = self.slot(contact, false).await?;
        Some(ContactSession::open(
            slot.lock_owned().await,
            self.database.clone(),
            self.clock.now(),
        ))
    }

    /// Copy of a contact's context, created if missing.
    pub async fn get_or_create(&self, contact: &ContactId) -> ConversationContext {
        let session = self.session(contact).await;
        (*session).clone()
    }

    /// Copy of a contact's context, if any.
    pub async fn get(&self, contact: &ContactId) -> Option<ConversationContext> {
        let session = self.existing_session(contact).await?;
        Some((*session).clone())
    }

    pub async fn attach_patient(&self, contact: &ContactId, patient: &PatientIdentity) {
        let mut session = self.session(contact).await;
        let now = session.now();
        session.attach_patient(patient, now);
        session.commit().await;
    }

    pub async fn register_system_message(&self, contact: &ContactId, message: SystemMessage) {
        let mut session = self.session(contact).await;
        let now = session.now();
        debug!(contact = %contact, record = %message.record_id, "Registering system message");
        session.register_system_message(message, now);
        session.commit().await;
    }

    pub async fn register_inbound(
        &self,
        contact: &ContactId,
        text: &str,
        classification: Option<&IntentClassification>,
    ) {
        let mut session = self.session(contact).await;
        let now = session.now();
        session.register_inbound(text, classification, now);
        session.commit().await;
    }

    pub async fn mark_responded(&self, contact: &ContactId, record_id: &str) -> Option<SystemMessage> {
        let mut session = self.existing_session(contact).await?;
        let now = session.now();
        let message = session.mark_responded(record_id, now);
        session.commit().await;
        message
    }

    pub async fn check_ambiguity(&self, contact: &ContactId) -> AmbiguityCheck {
        match self.existing_session(contact).await {
            Some(session) => session.check_ambiguity(),
            None => AmbiguityCheck {
                ambiguous: false,
                pending_count: 0,
                pending: Vec::new(),
            },
        }
    }

    pub async fn next_pending(&self, contact: &ContactId) -> Option<SystemMessage> {
        let session = self.existing_session(contact).await?;
        session.next_pending().cloned()
    }

    pub async fn increment_failed_attempts(&self, contact: &ContactId) -> u32 {
        let mut session = self.session(contact).await;
        let now = session.now();
        let attempts = session.increment_failed_attempts(now);
        session.commit().await;
        attempts
    }

    pub async fn reset_failed_attempts(&self, contact: &ContactId) {
        let mut session = self.session(contact).await;
        let now = session.now();
        session.reset_failed_attempts(now);
        session.commit().await;
    }

    pub async fn register_reschedule_request(
        &self,
        contact: &ContactId,
        original_record_id: &str,
        specialty: &str,
        patient: &PatientIdentity,
    ) -> RescheduleRequest {
        let mut session = self.session(contact).await;
        let now = session.now();
        let request = session.register_reschedule_request(original_record_id, specialty, patient, now);
        session.commit().await;
        info!(
            contact = %contact,
            request = %request.request_id,
            "Reschedule request registered for {}",
            original_record_id
        );
        request
    }

    /// Open requests for `specialty` inside the reschedule window.
    pub async fn pending_reschedule_requests(
        &self,
        contact: &ContactId,
        specialty: &str,
    ) -> Vec<RescheduleRequest> {
        match self.existing_session(contact).await {
            Some(session) => {
                let now = session.now();
                session.pending_reschedule_requests(specialty, self.windows.reschedule_window, now)
            }
            None => Vec::new(),
        }
    }

    pub async fn fulfill_reschedule_request(
        &self,
        contact: &ContactId,
        request_id: &str,
        new_appointment_id: &str,
    ) -> Result<RescheduleRequest> {
        let mut session = self.session(contact).await;
        let now = session.now();
        let fulfilled = session.fulfill_reschedule_request(request_id, new_appointment_id, now)?;
        session.commit().await;
        Ok(fulfilled)
    }

    /// Flag `new_appointment_id` as a reschedule for the anti-loop TTL.
    pub async fn mark_appointment_as_reschedule(
        &self,
        contact: &ContactId,
        new_appointment_id: &str,
        original_appointment_id: &str,
    ) {
        let mut session = self.session(contact).await;
        let now = session.now();
        session.mark_appointment_as_reschedule(
            new_appointment_id,
            original_appointment_id,
            self.windows.anti_loop_ttl,
            now,
        );
        session.commit().await;
    }

    pub async fn is_recent_reschedule(&self, contact: &ContactId, appointment_id: &str) -> bool {
        match self.existing_session(contact).await {
            Some(session) => {
                let now = session.now();
                session.is_recent_reschedule(appointment_id, now)
            }
            None => false,
        }
    }

    /// Load every persisted context into memory. Returns how many were loaded.
    pub async fn load_all(&self) -> Result<usize> {
        let Some(database) = &self.database else {
            return Ok(0);
        };

        let rows = context_store::list_contexts(database.pool()).await?;
        let mut contexts = self.contexts.write().await;
        let mut loaded = 0;
        for row in rows {
            let context: ConversationContext = match serde_json::from_str(&row.snapshot) {
                Ok(context) => context,
                Err(err) => {
                    warn!("Skipping unreadable context for {}: {}", row.contact_id, err);
                    continue;
                }
            };
            contexts
                .entry(context.contact.clone())
                .or_insert_with(|| Arc::new(Mutex::new(context)));
            loaded += 1;
        }

        info!("Loaded {} conversation contexts", loaded);
        Ok(loaded)
    }

    /// Drop contexts idle for longer than the context TTL and close expired
    /// reschedule requests. Contexts in use are left alone.
    pub async fn prune_inactive(&self) -> Result<usize> {
        let now = self.clock.now();
        let cutoff = now - self.windows.context_ttl;
        let mut removed = 0;

        {
            let mut contexts = self.contexts.write().await;
            contexts.retain(|_, slot| {
                if Arc::strong_count(slot) > 1 {
                    return true;
                }
                let Ok(mut context) = slot.try_lock() else {
                    return true;
                };
                if context.updated_at < cutoff {
                    removed += 1;
                    return false;
                }
                context.expire_reschedule_requests(self.windows.reschedule_window, now);
                true
            });
        }

        if let Some(database) = &self.database {
            let cutoff = cutoff.to_rfc3339_opts(SecondsFormat::Millis, true);
            let pruned = context_store::prune_updated_before(database.pool(), &cutoff).await?;
            debug!("Pruned {} stored contexts", pruned);
        }

        if removed > 0 {
            info!("Pruned {} inactive conversation contexts", removed);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> StoreStats {
        let slots: Vec<Slot> = self.contexts.read().await.values().cloned().collect();
        let mut stats = StoreStats {
            total_contexts: slots.len(),
            ..StoreStats::default()
        };

        for slot in slots {
            let context = slot.lock().await;
            if !context.pending.is_empty() {
                stats.with_pending += 1;
            }
            if context.pending.len() > 1 {
                stats.with_ambiguity += 1;
            }
            if context.has_open_reschedule_requests() {
                stats.with_reschedule += 1;
            }
        }
        stats
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use reply_core::{FlowType, ManualClock, OutboundPayload};

    fn contact() -> ContactId {
        ContactId::parse("11987654321").unwrap()
    }

    fn message(record: &str, sent_at: DateTime<Utc>) -> SystemMessage {
        SystemMessage::new(
            format!("sm-{record}"),
            FlowType::Confirmation,
            record,
            format!("Cardiology {record}"),
            OutboundPayload::text("Olá"),
            sent_at,
        )
    }

    fn clocked() -> (Arc<ManualClock>, ConversationStore) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        let store = ConversationStore::default().with_clock(clock.clone());
        (clock, store)
    }

    async fn memory_db() -> Database {
        let db = Database::connect_with_pool_size("sqlite::memory:", 1).await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_reads_do_not_create_contexts() {
        let store = ConversationStore::default();
        assert!(!store.check_ambiguity(&contact()).await.ambiguous);
        assert!(store.next_pending(&contact()).await.is_none());
        assert!(store.is_empty().await);

        store.get_or_create(&contact()).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ambiguity_and_oldest_first() {
        let (clock, store) = clocked();
        let now = clock.now();
        store.register_system_message(&contact(), message("R1", now)).await;
        store
            .register_system_message(&contact(), message("R2", now + Duration::seconds(60)))
            .await;

        let check = store.check_ambiguity(&contact()).await;
        assert!(check.ambiguous);
        assert_eq!(check.pending_count, 2);
        assert_eq!(store.next_pending(&contact()).await.unwrap().record_id, "R1");

        store.mark_responded(&contact(), "R1").await.unwrap();
        assert!(!store.check_ambiguity(&contact()).await.ambiguous);
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_dropped() {
        let (clock, store) = clocked();
        let now = clock.now();

        let mut session = store.session(&contact()).await;
        session.register_system_message(message("R1", now), now);
        session.increment_failed_attempts(now);
        assert_eq!(session.saved().failed_attempts, 0);
        session.discard();

        let mut session = store.session(&contact()).await;
        session.increment_failed_attempts(now);
        drop(session);

        let context = store.get(&contact()).await.unwrap();
        assert!(context.pending.is_empty());
        assert_eq!(context.failed_attempts, 0);

        let mut session = store.session(&contact()).await;
        session.register_system_message(message("R1", now), now);
        session.commit().await;
        assert_eq!(store.next_pending(&contact()).await.unwrap().record_id, "R1");
    }

    #[tokio::test]
    async fn test_reschedule_window_follows_clock() {
        let (clock, store) = clocked();
        let patient = PatientIdentity::new(Some("P".to_string()), None);
        store
            .register_reschedule_request(&contact(), "R2", "Cardiology", &patient)
            .await;

        clock.advance(Duration::hours(71));
        assert_eq!(store.pending_reschedule_requests(&contact(), "Cardiology").await.len(), 1);

        clock.advance(Duration::hours(2));
        assert!(store.pending_reschedule_requests(&contact(), "Cardiology").await.is_empty());
    }

    #[tokio::test]
    async fn test_anti_loop_marker_ttl() {
        let (clock, store) = clocked();
        store.mark_appointment_as_reschedule(&contact(), "N1", "R2").await;
        assert!(store.is_recent_reschedule(&contact(), "N1").await);

        clock.advance(Duration::hours(49));
        assert!(!store.is_recent_reschedule(&contact(), "N1").await);
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialized() {
        let store = Arc::new(ConversationStore::default());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_failed_attempts(&contact()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get(&contact()).await.unwrap().failed_attempts, 50);
    }

    #[tokio::test]
    async fn test_prune_inactive() {
        let (clock, store) = clocked();
        let other = ContactId::parse("11911112222").unwrap();
        store.get_or_create(&contact()).await;

        clock.advance(Duration::days(6));
        store.reset_failed_attempts(&other).await;

        clock.advance(Duration::days(2));
        assert_eq!(store.prune_inactive().await.unwrap(), 1);
        assert!(store.get(&contact()).await.is_none());
        assert!(store.get(&other).await.is_some());
    }

    #[tokio::test]
    async fn test_stats() {
        let (clock, store) = clocked();
        let now = clock.now();
        let other = ContactId::parse("11911112222").unwrap();
        store.register_system_message(&contact(), message("R1", now)).await;
        store.register_system_message(&contact(), message("R2", now)).await;
        store.register_system_message(&other, message("R3", now)).await;
        store
            .register_reschedule_request(&other, "R9", "Cardiology", &PatientIdentity::default())
            .await;

        let stats = store.stats().await;
        assert_eq!(stats.total_contexts, 2);
        assert_eq!(stats.with_pending, 2);
        assert_eq!(stats.with_ambiguity, 1);
        assert_eq!(stats.with_reschedule, 1);
    }

    #[tokio::test]
    async fn test_contexts_survive_restart() {
        let db = memory_db().await;
        let now = Utc::now();

        let store = ConversationStore::default().with_database(db.clone());
        store.register_system_message(&contact(), message("R1", now)).await;
        store.increment_failed_attempts(&contact()).await;

        let restarted = ConversationStore::default().with_database(db.clone());
        let context = restarted.get(&contact()).await.unwrap();
        assert_eq!(context.pending.len(), 1);
        assert_eq!(context.failed_attempts, 1);

        let fresh = ConversationStore::default().with_database(db);
        assert_eq!(fresh.load_all().await.unwrap(), 1);
        assert_eq!(fresh.len().await, 1);
    }
}
