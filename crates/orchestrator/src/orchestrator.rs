//! Inbound reply pipeline.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conversation_store::{ContactSession, ConversationStore};
use dispatch_queue::{DispatchOutcome, DispatchQueue};
use reply_core::{
    ClassifierError, Clock, ConfidenceBand, ConfidenceThresholds, ContactId, FlowType,
    InboundMessage, IntentClassification, IntentClassifier, OutboundPayload, ReplyTemplates,
    SystemClock, SystemMessage,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditKind, AuditLog, AuditSink, DISPATCH_FAILED, DISPATCH_SENT};
use crate::error::{OrchestratorError, Result};
use crate::linker::LinkLedger;
use crate::records::{RecordBook, TrackedRecord};
use crate::transitions::{Badge, FollowUp, TransitionOutcome};

/// Default time allowed for one classification.
pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of classification attempts per pass.
pub const DEFAULT_CLASSIFIER_ATTEMPTS: u32 = 3;

const CLASSIFIER_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What a pipeline pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineAction {
    /// Several messages were waiting; the patient was asked to answer one at a time.
    AmbiguityClarification,
    /// Nothing was waiting for a reply.
    PatientInitiated,
    /// The reply answers another kind of message.
    IncompatibleIntent,
    /// The reply was acted on.
    AutoProcess,
    /// The patient was asked to confirm what was understood.
    RequestConfirmation,
    /// The reply was not understood.
    Fallback,
    /// Too many replies in a row were not understood.
    SignOff,
    /// The message was rejected before processing.
    Rejected,
    /// The pass did not finish in time and was abandoned.
    TimedOut,
}

impl PipelineAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AmbiguityClarification => "ambiguity_clarification",
            Self::PatientInitiated => "patient_initiated",
            Self::IncompatibleIntent => "incompatible_intent",
            Self::AutoProcess => "auto_process",
            Self::RequestConfirmation => "request_confirmation",
            Self::Fallback => "fallback",
            Self::SignOff => "sign_off",
            Self::Rejected => "rejected",
            Self::TimedOut => "timeout",
        }
    }
}

/// Result of one pipeline pass. Always produced, even when something failed.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub contact: ContactId,
    pub action: PipelineAction,
    /// Pending system message the reply was attributed to.
    pub system_message_id: Option<String>,
    pub record_id: Option<String>,
    pub classification: Option<IntentClassification>,
    pub band: Option<ConfidenceBand>,
    pub transition: Option<TransitionOutcome>,
    /// Queue ids of the messages sent back.
    pub replies: Vec<String>,
    pub failed_attempts: u32,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
}

impl PipelineOutcome {
    fn new(contact: ContactId) -> Self {
        Self {
            contact,
            action: PipelineAction::Rejected,
            system_message_id: None,
            record_id: None,
            classification: None,
            band: None,
            transition: None,
            replies: Vec::new(),
            failed_attempts: 0,
            error: None,
            error_kind: None,
        }
    }

    fn fail(&mut self, err: &OrchestratorError) {
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind());
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Coordinates the conversation store, the classifier, the record book and
/// the dispatch queue.
///
/// Every pass over an inbound message holds the contact's lock from the
/// ambiguity check until the store is committed, so two replies from the
/// same contact never interleave.
pub struct Orchestrator {
    pub(crate) store: Arc<ConversationStore>,
    pub(crate) records: Arc<RecordBook>,
    pub(crate) classifier: Arc<dyn IntentClassifier>,
    pub(crate) queue: DispatchQueue,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) templates: Arc<ReplyTemplates>,
    pub(crate) thresholds: ConfidenceThresholds,
    pub(crate) classifier_timeout: Duration,
    pub(crate) classifier_attempts: u32,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) links: Mutex<LinkLedger>,
}

impl Orchestrator {
    /// Create an orchestrator with in-memory stores and default settings.
    pub fn new(classifier: Arc<dyn IntentClassifier>, queue: DispatchQueue) -> Self {
        Self {
            store: Arc::new(ConversationStore::default()),
            records: Arc::new(RecordBook::new()),
            classifier,
            queue,
            audit: Arc::new(AuditLog::new()),
            templates: Arc::new(ReplyTemplates::default()),
            thresholds: ConfidenceThresholds::default(),
            classifier_timeout: DEFAULT_CLASSIFIER_TIMEOUT,
            classifier_attempts: DEFAULT_CLASSIFIER_ATTEMPTS,
            clock: Arc::new(SystemClock),
            links: Mutex::new(LinkLedger::default()),
        }
    }

    pub fn with_store(mut self, store: Arc<ConversationStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_records(mut self, records: Arc<RecordBook>) -> Self {
        self.records = records;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_templates(mut self, templates: ReplyTemplates) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    pub fn with_thresholds(mut self, thresholds: ConfidenceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    /// Attempts per classification, at least one.
    pub fn with_classifier_attempts(mut self, attempts: u32) -> Self {
        self.classifier_attempts = attempts.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn records(&self) -> &Arc<RecordBook> {
        &self.records
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn templates(&self) -> &ReplyTemplates {
        &self.templates
    }

    /// Queue a message for a contact.
    pub(crate) fn enqueue(
        &self,
        contact: &ContactId,
        payload: OutboundPayload,
        tag: &str,
    ) -> Result<String> {
        Ok(self
            .queue
            .enqueue(contact.clone(), payload, Some(tag.to_string()))?)
    }

    /// Queue a message that expects a reply and track it as pending.
    pub(crate) fn send_system_message(
        &self,
        session: &mut ContactSession,
        flow: FlowType,
        record: &TrackedRecord,
        payload: OutboundPayload,
    ) -> Result<String> {
        let now = session.now();
        let contact = session.contact.clone();
        let id = self.enqueue(&contact, payload.clone(), &record.record_id)?;
        let summary = self.templates.summary(&record.specialty, record.scheduled_at);
        session.register_system_message(
            SystemMessage::new(id.clone(), flow, &record.record_id, summary, payload, now),
            now,
        );
        Ok(id)
    }

    /// Classify with a timeout per attempt. Outages and timeouts are retried
    /// with a growing delay; invalid input is not.
    async fn classify(&self, text: &str, flow: FlowType) -> Result<IntentClassification> {
        let mut attempt = 1;
        loop {
            let result =
                tokio::time::timeout(self.classifier_timeout, self.classifier.classify(text, Some(flow)))
                    .await
                    .unwrap_or(Err(ClassifierError::Timeout));

            match result {
                Ok(classification) => return Ok(classification),
                Err(err @ (ClassifierError::Unavailable(_) | ClassifierError::Timeout))
                    if attempt < self.classifier_attempts =>
                {
                    warn!(
                        classifier = self.classifier.name(),
                        "Classification attempt {}/{} failed: {}",
                        attempt,
                        self.classifier_attempts,
                        err
                    );
                    tokio::time::sleep(CLASSIFIER_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Process one inbound message end to end.
    ///
    /// Never returns an error: failures are reported in the outcome and in the
    /// audit log.
    pub async fn process_inbound(&self, message: InboundMessage) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::new(message.contact.clone());

        if let Err(err) = message.validate() {
            warn!(contact = %message.contact, "Rejected inbound message: {}", err);
            outcome.error = Some(err.to_string());
            self.audit_pass(&message, &outcome).await;
            return outcome;
        }

        let mut session = self.store.session(&message.contact).await;
        match self.run_pass(&mut session, &message, &mut outcome).await {
            Ok(()) => {
                outcome.failed_attempts = session.failed_attempts;
                session.commit().await;
            }
            Err(err) => {
                warn!(
                    contact = %message.contact,
                    action = outcome.action.as_str(),
                    "Inbound pass failed: {}",
                    err
                );
                outcome.fail(&err);
                if outcome.transition.is_some() {
                    // The record already moved; the conversation has to follow it.
                    outcome.failed_attempts = session.failed_attempts;
                    session.commit().await;
                } else {
                    outcome.failed_attempts = session.saved().failed_attempts;
                    session.discard();
                }
            }
        }

        info!(
            contact = %message.contact,
            action = outcome.action.as_str(),
            record = outcome.record_id.as_deref().unwrap_or("-"),
            "Processed inbound message"
        );
        self.audit_pass(&message, &outcome).await;
        outcome
    }

    async fn run_pass(
        &self,
        session: &mut ContactSession,
        message: &InboundMessage,
        outcome: &mut PipelineOutcome,
    ) -> Result<()> {
        let now = session.now();
        let contact = message.contact.clone();

        // 1. Several messages waiting: do not guess which one is answered.
        let ambiguity = session.check_ambiguity();
        if ambiguity.ambiguous {
            outcome.action = PipelineAction::AmbiguityClarification;
            session.register_inbound(&message.text, None, now);

            let Some(oldest) = ambiguity.pending.first() else {
                return Ok(());
            };
            outcome.system_message_id = Some(oldest.id.clone());
            outcome.record_id = Some(oldest.record_id.clone());
            debug!(contact = %contact, pending = ambiguity.pending_count, "Ambiguous reply");

            let listing = self
                .templates
                .ambiguity(ambiguity.pending.iter().map(|m| m.summary.as_str()));
            outcome
                .replies
                .push(self.enqueue(&contact, OutboundPayload::text(listing), &oldest.record_id)?);
            outcome
                .replies
                .push(self.enqueue(&contact, oldest.content.clone(), &oldest.record_id)?);
            return Ok(());
        }

        // 2. Nothing waiting for a reply.
        let Some(target) = session.next_pending().cloned() else {
            outcome.action = PipelineAction::PatientInitiated;
            session.register_inbound(&message.text, None, now);
            let reply = OutboundPayload::text(self.templates.scope_explanation.clone());
            outcome.replies.push(self.enqueue(&contact, reply, "scope")?);
            return Ok(());
        };
        outcome.system_message_id = Some(target.id.clone());
        outcome.record_id = Some(target.record_id.clone());
        let flow = target.flow;

        // 3. Classify against the pending message's flow.
        let classification = match self.classify(message.classification_text(), flow).await {
            Ok(classification) => classification,
            Err(err) => {
                outcome.action = PipelineAction::Fallback;
                session.register_inbound(&message.text, None, now);
                let reply = OutboundPayload::text(self.templates.generic_clarification(flow));
                outcome
                    .replies
                    .push(self.enqueue(&contact, reply, &target.record_id)?);
                return Err(err);
            }
        };
        session.register_inbound(&message.text, Some(&classification), now);
        outcome.classification = Some(classification.clone());
        let intent = classification.intent;

        // 4. Replies meant for the other flow are not acted on.
        if !intent.is_unclassified() && !self.classifier.is_compatible(intent, flow) {
            outcome.action = PipelineAction::IncompatibleIntent;
            let reply = self.templates.incompatible_intent(&target.summary, flow);
            outcome
                .replies
                .push(self.enqueue(&contact, OutboundPayload::text(reply), &target.record_id)?);
            return Ok(());
        }

        // 5. Route on confidence.
        let band = if intent.is_unclassified() {
            ConfidenceBand::Low
        } else {
            self.thresholds.band(classification.confidence)
        };
        outcome.band = Some(band);

        match band {
            ConfidenceBand::High => {
                outcome.action = PipelineAction::AutoProcess;
                self.auto_process(session, &target, &classification, outcome)
                    .await
            }
            ConfidenceBand::Medium => {
                outcome.action = PipelineAction::RequestConfirmation;
                session.increment_failed_attempts(now);
                let reply = self.classifier.clarification_message(
                    &classification,
                    flow,
                    band,
                    &self.templates,
                );
                outcome
                    .replies
                    .push(self.enqueue(&contact, OutboundPayload::text(reply), &target.record_id)?);
                Ok(())
            }
            ConfidenceBand::Low => {
                let attempts = session.increment_failed_attempts(now);
                let reply = if attempts >= self.thresholds.max_fallbacks {
                    outcome.action = PipelineAction::SignOff;
                    self.templates.sign_off.clone()
                } else {
                    outcome.action = PipelineAction::Fallback;
                    self.classifier.clarification_message(
                        &classification,
                        flow,
                        band,
                        &self.templates,
                    )
                };
                outcome
                    .replies
                    .push(self.enqueue(&contact, OutboundPayload::text(reply), &target.record_id)?);
                Ok(())
            }
        }
    }

    async fn auto_process(
        &self,
        session: &mut ContactSession,
        target: &SystemMessage,
        classification: &IntentClassification,
        outcome: &mut PipelineOutcome,
    ) -> Result<()> {
        let now = session.now();
        let contact = session.contact.clone();

        let (record, transition) = match self
            .records
            .apply_intent(target.flow, &target.record_id, classification.intent, &self.templates)
            .await
        {
            Ok(applied) => applied,
            Err(err) => {
                // The record moved on without this conversation. The pending
                // message stays for an operator to settle.
                self.report_integrity(&contact, &target.record_id, &err).await;
                let reply = OutboundPayload::text(self.templates.scope_explanation.clone());
                outcome
                    .replies
                    .push(self.enqueue(&contact, reply, &target.record_id)?);
                return Err(err);
            }
        };

        session.mark_responded(&target.record_id, now);
        session.reset_failed_attempts(now);

        for follow_up in &transition.follow_up {
            match follow_up {
                FollowUp::RegisterRescheduleRequest { record_id } => {
                    if session.is_recent_reschedule(record_id, now) {
                        debug!(record = %record_id, "Skipping reschedule request for a fresh reschedule");
                        continue;
                    }
                    session.register_reschedule_request(
                        record_id,
                        &record.specialty,
                        &record.patient,
                        now,
                    );
                }
                FollowUp::CancelInSourceSystem { record_id } => {
                    info!(record = %record_id, "Record needs cancelling in the scheduling system");
                }
            }
        }

        let reply = OutboundPayload::text(transition.auto_reply.clone());
        outcome.transition = Some(transition);
        outcome
            .replies
            .push(self.enqueue(&contact, reply, &target.record_id)?);
        Ok(())
    }

    pub(crate) async fn report_integrity(
        &self,
        contact: &ContactId,
        record_id: &str,
        err: &OrchestratorError,
    ) {
        warn!(contact = %contact, record = %record_id, "{}", err);
        self.audit
            .record(
                AuditEntry::new(AuditKind::Integrity, self.clock.now())
                    .contact(contact)
                    .record(record_id)
                    .action(err.kind())
                    .error(err.to_string()),
            )
            .await;
    }

    async fn audit_pass(&self, message: &InboundMessage, outcome: &PipelineOutcome) {
        let mut entry = AuditEntry::new(AuditKind::Inbound, self.clock.now())
            .contact(&message.contact)
            .action(outcome.action.as_str());
        entry.record_id = outcome.record_id.clone();
        entry.system_message_id = outcome.system_message_id.clone();
        entry.raw_text = Some(message.text.clone());
        entry.classification = outcome.classification.clone();
        entry.band = outcome.band;
        entry.received_at = Some(message.received_at);
        if let Some(error) = &outcome.error {
            entry = entry.error(error.clone());
        }
        self.audit.record(entry).await;
    }

    /// Record a pass that was abandoned after `after`.
    ///
    /// Whatever the pass changed in the conversation was never committed.
    pub async fn report_timeout(&self, message: &InboundMessage, after: Duration) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::new(message.contact.clone());
        outcome.action = PipelineAction::TimedOut;
        outcome.error = Some(format!("pipeline pass timed out after {:?}", after));
        outcome.error_kind = Some("timeout");
        self.audit_pass(message, &outcome).await;
        outcome
    }

    /// Record every settled outbound item in the audit log until `shutdown`
    /// resolves.
    ///
    /// Subscribes before returning, so nothing sent after this call is missed.
    pub fn spawn_dispatch_audit<F>(self: &Arc<Self>, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut outcomes = self.queue.subscribe();
        let orchestrator = Arc::clone(self);

        tokio::spawn(async move {
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown => break,

                    received = outcomes.recv() => match received {
                        Ok(outcome) => orchestrator.audit_dispatch(outcome).await,
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Dispatch audit missed {} outcomes", missed);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Dispatch audit stopped");
        })
    }

    async fn audit_dispatch(&self, outcome: DispatchOutcome) {
        let (item, error) = match outcome {
            DispatchOutcome::Sent { item, .. } => (item, None),
            DispatchOutcome::Failed { item, error } => (item, Some(error)),
            DispatchOutcome::Retrying { .. } => return,
        };

        let action = if error.is_some() {
            DISPATCH_FAILED
        } else {
            DISPATCH_SENT
        };
        let mut entry = AuditEntry::new(AuditKind::Outbound, self.clock.now())
            .contact(&item.contact)
            .action(action);
        entry.record_id = item.tag;
        entry.system_message_id = Some(item.id);
        if let Some(error) = error {
            entry = entry.error(error);
        }
        self.audit.record(entry).await;
    }

    /// Operator override: resolve a pending-action badge.
    pub async fn resolve_badge(
        &self,
        flow: FlowType,
        record_id: &str,
        badge: Badge,
    ) -> Result<TrackedRecord> {
        let result = self.records.resolve_badge(flow, record_id, badge).await;
        let mut entry = AuditEntry::new(AuditKind::Override, self.clock.now())
            .record(record_id)
            .action(format!("resolve:{}", badge.as_str()));
        if let Err(err) = &result {
            entry = entry.error(err.to_string());
        }
        self.audit.record(entry).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dispatch_queue::DispatchConfig;
    use mock_classifier::{
        DelayedClassifier, FailingClassifier, FixedClassifier, RecordingTransport,
        ScriptedClassifier,
    };
    use reply_core::{AppointmentEvent, Intent, PatientIdentity};

    fn contact() -> ContactId {
        ContactId::parse("11987654321").unwrap()
    }

    fn queue() -> DispatchQueue {
        DispatchQueue::new(
            DispatchConfig::immediate(),
            Arc::new(RecordingTransport::new()),
        )
    }

    fn event(record_id: &str) -> AppointmentEvent {
        AppointmentEvent {
            record_id: record_id.to_string(),
            patient: PatientIdentity::new(Some("P".to_string()), None),
            patient_name: Some("Maria".to_string()),
            specialty: "Cardiology".to_string(),
            scheduled_at: Utc::now(),
            created_at: Utc::now(),
            cancelled_at: None,
            phones: vec!["11987654321".to_string()],
        }
    }

    async fn pending(orchestrator: &Orchestrator, flow: FlowType, record_id: &str) {
        let record = orchestrator
            .records
            .insert(TrackedRecord::from_event(flow, &event(record_id), Utc::now()))
            .await;
        let mut session = orchestrator.store.session(&contact()).await;
        orchestrator
            .send_system_message(&mut session, flow, &record, OutboundPayload::text("Olá"))
            .unwrap();
        session.commit().await;
    }

    #[tokio::test]
    async fn test_no_pending_message_explains_scope() {
        let orchestrator =
            Orchestrator::new(Arc::new(FixedClassifier::new(Intent::Confirmed, 0.9)), queue());
        let outcome = orchestrator
            .process_inbound(InboundMessage::new(contact(), "oi", Utc::now()))
            .await;
        assert_eq!(outcome.action, PipelineAction::PatientInitiated);
        assert!(outcome.classification.is_none());
        assert_eq!(outcome.replies.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let orchestrator =
            Orchestrator::new(Arc::new(FixedClassifier::new(Intent::Confirmed, 0.9)), queue());
        let outcome = orchestrator
            .process_inbound(InboundMessage::new(contact(), "  ", Utc::now()))
            .await;
        assert_eq!(outcome.action, PipelineAction::Rejected);
        assert!(!outcome.is_success());
        assert_eq!(orchestrator.queue.status().queue_length, 0);
    }

    #[tokio::test]
    async fn test_incompatible_intent_leaves_record_alone() {
        let orchestrator = Orchestrator::new(
            Arc::new(FixedClassifier::new(Intent::WantsReschedule, 0.95)),
            queue(),
        );
        pending(&orchestrator, FlowType::Confirmation, "R1").await;

        let outcome = orchestrator
            .process_inbound(InboundMessage::new(contact(), "quero remarcar", Utc::now()))
            .await;
        assert_eq!(outcome.action, PipelineAction::IncompatibleIntent);
        assert_eq!(outcome.failed_attempts, 0);
        let record = orchestrator.records.get(FlowType::Confirmation, "R1").await.unwrap();
        assert_eq!(record.status, crate::transitions::RecordStatus::Pending);
        assert_eq!(orchestrator.store.check_ambiguity(&contact()).await.pending_count, 1);
    }

    #[tokio::test]
    async fn test_sign_off_after_repeated_fallbacks() {
        let orchestrator =
            Orchestrator::new(Arc::new(FixedClassifier::new(Intent::FreeTalk, 0.3)), queue());
        pending(&orchestrator, FlowType::Confirmation, "R1").await;

        let mut actions = Vec::new();
        for _ in 0..3 {
            let outcome = orchestrator
                .process_inbound(InboundMessage::new(contact(), "hmm", Utc::now()))
                .await;
            actions.push(outcome.action);
        }
        assert_eq!(
            actions,
            vec![
                PipelineAction::Fallback,
                PipelineAction::Fallback,
                PipelineAction::SignOff
            ]
        );
    }

    #[tokio::test]
    async fn test_classifier_failure_is_recoverable() {
        let orchestrator = Orchestrator::new(Arc::new(FailingClassifier), queue());
        pending(&orchestrator, FlowType::Confirmation, "R1").await;

        let outcome = orchestrator
            .process_inbound(InboundMessage::new(contact(), "sim", Utc::now()))
            .await;
        assert_eq!(outcome.action, PipelineAction::Fallback);
        assert_eq!(outcome.error_kind, Some("classification_unavailable"));
        assert_eq!(outcome.replies.len(), 1);
        assert_eq!(outcome.failed_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_timeout() {
        let slow = DelayedClassifier::with_secs(FixedClassifier::new(Intent::Confirmed, 0.9), 60);
        let orchestrator = Orchestrator::new(Arc::new(slow), queue())
            .with_classifier_timeout(Duration::from_secs(5));
        pending(&orchestrator, FlowType::Confirmation, "R1").await;

        let outcome = orchestrator
            .process_inbound(InboundMessage::new(contact(), "sim", Utc::now()))
            .await;
        assert_eq!(outcome.error_kind, Some("classification_unavailable"));
        let record = orchestrator.records.get(FlowType::Confirmation, "R1").await.unwrap();
        assert_eq!(record.status, crate::transitions::RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_rejected_transition_keeps_pending_message() {
        let orchestrator =
            Orchestrator::new(Arc::new(FixedClassifier::new(Intent::Confirmed, 0.95)), queue());
        pending(&orchestrator, FlowType::Confirmation, "R1").await;
        orchestrator
            .records
            .mark_cancelled_in_source(FlowType::Confirmation, "R1", Utc::now())
            .await
            .unwrap();

        let outcome = orchestrator
            .process_inbound(InboundMessage::new(contact(), "1", Utc::now()))
            .await;
        assert_eq!(outcome.error_kind, Some("transition_rejected"));
        assert_eq!(outcome.replies.len(), 1);
        let still_pending = orchestrator.store.next_pending(&contact()).await;
        assert_eq!(still_pending.map(|m| m.record_id), Some("R1".to_string()));
        assert_eq!(orchestrator.audit.metrics().await.integrity_warnings, 1);
    }

    #[tokio::test]
    async fn test_failed_pass_leaves_conversation_untouched() {
        let orchestrator =
            Orchestrator::new(Arc::new(FixedClassifier::new(Intent::Confirmed, 0.95)), queue());
        pending(&orchestrator, FlowType::Confirmation, "R1").await;
        orchestrator
            .records
            .mark_cancelled_in_source(FlowType::Confirmation, "R1", Utc::now())
            .await
            .unwrap();
        let before = orchestrator.store.get(&contact()).await.unwrap();

        orchestrator
            .process_inbound(InboundMessage::new(contact(), "1", Utc::now()))
            .await;

        let after = orchestrator.store.get(&contact()).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(after.pending.len(), 1);
        assert_eq!(after.inbound_count, 0);
    }

    #[tokio::test]
    async fn test_missing_record_aborts_without_side_effects() {
        let orchestrator =
            Orchestrator::new(Arc::new(FixedClassifier::new(Intent::Confirmed, 0.95)), queue());
        let ghost = TrackedRecord::from_event(FlowType::Confirmation, &event("GHOST"), Utc::now());
        let mut session = orchestrator.store.session(&contact()).await;
        orchestrator
            .send_system_message(&mut session, FlowType::Confirmation, &ghost, OutboundPayload::text("Olá"))
            .unwrap();
        session.commit().await;

        let outcome = orchestrator
            .process_inbound(InboundMessage::new(contact(), "1", Utc::now()))
            .await;
        assert_eq!(outcome.error_kind, Some("record_not_found"));
        assert!(outcome.transition.is_none());
        let still_pending = orchestrator.store.next_pending(&contact()).await;
        assert_eq!(still_pending.map(|m| m.record_id), Some("GHOST".to_string()));
    }

    #[tokio::test]
    async fn test_classifier_outage_retried_once() {
        let classifier = Arc::new(ScriptedClassifier::new());
        classifier.push_failure().push(Intent::Confirmed, 0.95);
        let orchestrator = Orchestrator::new(classifier.clone(), queue());
        pending(&orchestrator, FlowType::Confirmation, "R1").await;

        let outcome = orchestrator
            .process_inbound(InboundMessage::new(contact(), "sim", Utc::now()))
            .await;
        assert_eq!(outcome.action, PipelineAction::AutoProcess);
        assert!(outcome.is_success());
        assert_eq!(classifier.call_count(), 2);
        let record = orchestrator.records.get(FlowType::Confirmation, "R1").await.unwrap();
        assert_eq!(record.status, crate::transitions::RecordStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_classifier_attempts_are_bounded() {
        let classifier = Arc::new(ScriptedClassifier::new());
        classifier.push_failure().push_failure().push(Intent::Confirmed, 0.95);
        let orchestrator = Orchestrator::new(classifier.clone(), queue()).with_classifier_attempts(2);
        pending(&orchestrator, FlowType::Confirmation, "R1").await;

        let outcome = orchestrator
            .process_inbound(InboundMessage::new(contact(), "sim", Utc::now()))
            .await;
        assert_eq!(outcome.error_kind, Some("classification_unavailable"));
        assert_eq!(classifier.call_count(), 2);
    }

    #[tokio::test]
    async fn test_pass_audit_carries_receipt_time() {
        let audit = Arc::new(AuditLog::new());
        let orchestrator =
            Orchestrator::new(Arc::new(FixedClassifier::new(Intent::Confirmed, 0.9)), queue())
                .with_audit(audit.clone());
        let received = Utc::now() - chrono::Duration::minutes(2);

        orchestrator
            .process_inbound(InboundMessage::new(contact(), "oi", received))
            .await;

        let entries = audit.entries_for(&contact());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].received_at, Some(received));
    }

    #[tokio::test]
    async fn test_report_timeout_is_audited() {
        let audit = Arc::new(AuditLog::new());
        let orchestrator =
            Orchestrator::new(Arc::new(FixedClassifier::new(Intent::Confirmed, 0.9)), queue())
                .with_audit(audit.clone());

        let message = InboundMessage::new(contact(), "sim", Utc::now());
        let outcome = orchestrator
            .report_timeout(&message, Duration::from_secs(30))
            .await;
        assert_eq!(outcome.action, PipelineAction::TimedOut);
        assert_eq!(outcome.error_kind, Some("timeout"));

        let entries = audit.entries_for(&contact());
        assert_eq!(entries[0].kind, AuditKind::Inbound);
        assert_eq!(entries[0].action.as_deref(), Some("timeout"));
        assert!(!entries[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_outcomes_audited() {
        let transport = Arc::new(RecordingTransport::new());
        let unreachable = ContactId::parse("11911112222").unwrap();
        transport.fail_contact(&unreachable);
        let queue = DispatchQueue::new(
            DispatchConfig::immediate().with_max_attempts(1),
            transport.clone(),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(FixedClassifier::new(Intent::Confirmed, 0.9)),
            queue.clone(),
        ));
        let auditor = orchestrator.spawn_dispatch_audit(std::future::pending());

        orchestrator
            .enqueue(&contact(), OutboundPayload::text("a"), "R1")
            .unwrap();
        orchestrator
            .enqueue(&unreachable, OutboundPayload::text("b"), "R2")
            .unwrap();
        let worker = queue.spawn();

        let mut metrics = orchestrator.audit.metrics().await;
        for _ in 0..100 {
            if metrics.total_entries >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            metrics = orchestrator.audit.metrics().await;
        }
        worker.abort();
        auditor.abort();

        assert_eq!(metrics.dispatch_failed, 1);
        assert_eq!(metrics.by_action.get(DISPATCH_SENT), Some(&1));
        assert_eq!(metrics.failures, 1);
    }
}
