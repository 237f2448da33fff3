//! End-to-end conversations through intake, the reply pipeline and the linker.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use conversation_store::ConversationStore;
use dispatch_queue::{DispatchConfig, DispatchQueue};
use keyword_classifier::KeywordClassifier;
use mock_classifier::{RecordingTransport, ScriptedClassifier};
use orchestrator::{
    AuditSink, Badge, IntakeOutcome, LinkOutcome, Orchestrator, PipelineAction, RecordBook,
    RecordStatus,
};
use reply_core::{
    AppointmentEvent, ContactId, FlowType, InboundMessage, Intent, IntentClassifier, ManualClock,
    PatientIdentity, SchedulingEvent, TimeWindows,
};

const PHONE: &str = "11987654321";

struct Harness {
    clock: Arc<ManualClock>,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new(classifier: Arc<dyn IntentClassifier>) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(ConversationStore::new(TimeWindows::default()).with_clock(clock.clone()));
        let records = Arc::new(RecordBook::new().with_clock(clock.clone()));
        let queue = DispatchQueue::new(
            DispatchConfig::immediate(),
            Arc::new(RecordingTransport::new()),
        );
        let orchestrator = Orchestrator::new(classifier, queue)
            .with_store(store)
            .with_records(records)
            .with_clock(clock.clone());
        Self {
            clock,
            orchestrator,
        }
    }

    fn keyword() -> Self {
        Self::new(Arc::new(KeywordClassifier::new()))
    }

    fn now(&self) -> DateTime<Utc> {
        reply_core::Clock::now(self.clock.as_ref())
    }

    async fn created(&self, record_id: &str, specialty: &str) -> IntakeOutcome {
        let event = appointment(record_id, specialty, self.now());
        self.orchestrator
            .handle_event(SchedulingEvent::AppointmentCreated(event))
            .await
    }

    async fn cancelled(&self, record_id: &str, specialty: &str) -> IntakeOutcome {
        let mut event = appointment(record_id, specialty, self.now());
        event.cancelled_at = Some(self.now());
        self.orchestrator
            .handle_event(SchedulingEvent::AppointmentCancelled(event))
            .await
    }

    async fn reply(&self, text: &str) -> orchestrator::PipelineOutcome {
        self.orchestrator
            .process_inbound(InboundMessage::new(contact(), text, self.now()))
            .await
    }

    async fn pending_records(&self) -> Vec<String> {
        self.orchestrator
            .store()
            .check_ambiguity(&contact())
            .await
            .pending
            .into_iter()
            .map(|m| m.record_id)
            .collect()
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn contact() -> ContactId {
    ContactId::parse(PHONE).unwrap()
}

fn appointment(record_id: &str, specialty: &str, now: DateTime<Utc>) -> AppointmentEvent {
    AppointmentEvent {
        record_id: record_id.to_string(),
        patient: PatientIdentity::new(Some("778899".to_string()), None),
        patient_name: Some("Ana Paula Lima".to_string()),
        specialty: specialty.to_string(),
        scheduled_at: now + Duration::days(5),
        created_at: now,
        cancelled_at: None,
        phones: vec![PHONE.to_string()],
    }
}

/// A patient who asked to reschedule R2 through a cancellation notice.
async fn reschedule_requested(harness: &Harness) {
    harness.cancelled("R2", "Cardiology").await;
    let outcome = harness.reply("quero remarcar").await;
    assert_eq!(outcome.action, PipelineAction::AutoProcess);
}

#[tokio::test]
async fn test_number_reply_confirms_appointment() {
    let harness = Harness::keyword();
    harness.created("R1", "Cardiology").await;

    let outcome = harness.reply("1").await;
    assert_eq!(outcome.action, PipelineAction::AutoProcess);
    let classification = outcome.classification.unwrap();
    assert_eq!(classification.intent, Intent::Confirmed);
    assert!(classification.confidence >= 0.95);
    assert_eq!(outcome.replies.len(), 1);

    let record = harness
        .orchestrator
        .records()
        .get(FlowType::Confirmation, "R1")
        .await
        .unwrap();
    assert_eq!(record.status, RecordStatus::Confirmed);
    assert_eq!(record.badge, None);
    assert!(harness.pending_records().await.is_empty());
}

#[tokio::test]
async fn test_medium_confidence_asks_before_acting() {
    let classifier = Arc::new(ScriptedClassifier::new());
    classifier.push(Intent::WantsReschedule, 0.6);
    let harness = Harness::new(classifier);
    harness.cancelled("R2", "Cardiology").await;

    let outcome = harness.reply("quero remarcar").await;
    assert_eq!(outcome.action, PipelineAction::RequestConfirmation);
    assert_eq!(outcome.failed_attempts, 1);

    let record = harness
        .orchestrator
        .records()
        .get(FlowType::Cancellation, "R2")
        .await
        .unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
    assert_eq!(record.badge, None);
    assert_eq!(harness.pending_records().await, vec!["R2".to_string()]);
}

#[tokio::test]
async fn test_reschedule_request_linked_to_new_appointment() {
    let harness = Harness::keyword();
    reschedule_requested(&harness).await;

    let cancelled = harness
        .orchestrator
        .records()
        .get(FlowType::Cancellation, "R2")
        .await
        .unwrap();
    assert_eq!(cancelled.badge, Some(Badge::Reschedule));

    harness.clock.advance(Duration::hours(10));
    let queued_before = harness.orchestrator.queue().status().queue_length;
    let outcome = harness.created("N1", "Cardiology").await;

    let IntakeOutcome::Linked(LinkOutcome::Linked {
        request_id,
        original_record_id,
        new_date_message,
        ..
    }) = outcome
    else {
        panic!("expected a link, got {outcome:?}");
    };
    assert!(request_id.is_some());
    assert_eq!(original_record_id, "R2");
    assert!(new_date_message.is_some());

    let original = harness
        .orchestrator
        .records()
        .get(FlowType::Cancellation, "R2")
        .await
        .unwrap();
    assert_eq!(original.badge, Some(Badge::Rescheduled));
    assert_eq!(original.linked_to.as_deref(), Some("N1"));
    assert!(original.new_date_notified);

    let items = harness.orchestrator.queue().drain();
    assert_eq!(items.len(), queued_before + 1);
    let last = items.last().unwrap();
    assert!(last.payload.text.contains("reagendada"));
    assert!(last.payload.has_buttons());
    assert_eq!(harness.pending_records().await, vec!["N1".to_string()]);
    assert_eq!(harness.orchestrator.link_stats().total_links, 1);
}

#[tokio::test]
async fn test_link_window_boundary() {
    for (hours, linked) in [(71, true), (73, false)] {
        let harness = Harness::keyword();
        reschedule_requested(&harness).await;
        harness.clock.advance(Duration::hours(hours));

        let outcome = harness.created("N1", "Cardiology").await;
        assert_eq!(
            matches!(outcome, IntakeOutcome::Linked(_)),
            linked,
            "after {hours}h: {outcome:?}"
        );
    }
}

#[tokio::test]
async fn test_different_specialty_never_links() {
    let harness = Harness::keyword();
    reschedule_requested(&harness).await;
    harness.clock.advance(Duration::hours(2));

    let outcome = harness.created("N1", "Dermatology").await;
    assert!(matches!(outcome, IntakeOutcome::ConfirmationRequested { .. }));
    let original = harness
        .orchestrator
        .records()
        .get(FlowType::Cancellation, "R2")
        .await
        .unwrap();
    assert_eq!(original.badge, Some(Badge::Reschedule));
    assert!(original.linked_to.is_none());
}

#[tokio::test]
async fn test_two_open_requests_link_the_earliest() {
    let harness = Harness::keyword();
    reschedule_requested(&harness).await;
    harness.clock.advance(Duration::hours(1));
    harness.cancelled("R3", "Cardiology").await;
    let outcome = harness.reply("quero remarcar").await;
    assert_eq!(outcome.record_id.as_deref(), Some("R3"));
    assert_eq!(outcome.action, PipelineAction::AutoProcess);

    harness.clock.advance(Duration::hours(1));
    let outcome = harness.created("N1", "Cardiology").await;
    let IntakeOutcome::Linked(LinkOutcome::Linked {
        original_record_id, ..
    }) = outcome
    else {
        panic!("expected a link, got {outcome:?}");
    };
    assert_eq!(original_record_id, "R2");

    let metrics = harness.orchestrator.audit().metrics().await;
    assert_eq!(metrics.integrity_warnings, 1);
    assert_eq!(metrics.by_action.get("ambiguous_link"), Some(&1));

    let later = harness
        .orchestrator
        .records()
        .get(FlowType::Cancellation, "R3")
        .await
        .unwrap();
    assert_eq!(later.badge, Some(Badge::Reschedule));
    assert!(later.linked_to.is_none());
}

#[tokio::test]
async fn test_request_without_identity_matches_through_cancelled_record() {
    let harness = Harness::keyword();
    harness.cancelled("R2", "Cardiology").await;

    let legacy = {
        let mut session = harness.orchestrator.store().session(&contact()).await;
        let now = session.now();
        let request =
            session.register_reschedule_request("R2", "Cardiology", &PatientIdentity::default(), now);
        session.commit().await;
        request
    };
    assert!(legacy.patient.is_empty());

    harness.clock.advance(Duration::hours(3));
    let outcome = harness.created("N1", "Cardiology").await;
    let IntakeOutcome::Linked(LinkOutcome::Linked {
        request_id,
        original_record_id,
        ..
    }) = outcome
    else {
        panic!("expected a link, got {outcome:?}");
    };
    assert_eq!(request_id, Some(legacy.request_id));
    assert_eq!(original_record_id, "R2");
}

#[tokio::test]
async fn test_request_without_identity_or_record_is_skipped() {
    let harness = Harness::keyword();
    {
        let mut session = harness.orchestrator.store().session(&contact()).await;
        let now = session.now();
        session.register_reschedule_request("R9", "Cardiology", &PatientIdentity::default(), now);
        session.commit().await;
    }

    harness.clock.advance(Duration::hours(3));
    let outcome = harness.created("N1", "Cardiology").await;
    assert!(matches!(outcome, IntakeOutcome::ConfirmationRequested { .. }));
}

#[tokio::test]
async fn test_operator_reschedule_without_reply_links() {
    let harness = Harness::keyword();
    harness.cancelled("R2", "Cardiology").await;
    harness.clock.advance(Duration::hours(5));

    let outcome = harness.created("N1", "Cardiology").await;
    let IntakeOutcome::Linked(LinkOutcome::Linked { request_id, .. }) = outcome else {
        panic!("expected a link, got {outcome:?}");
    };
    assert!(request_id.is_none());

    let original = harness
        .orchestrator
        .records()
        .get(FlowType::Cancellation, "R2")
        .await
        .unwrap();
    assert_eq!(original.badge, None);
    assert_eq!(original.linked_to.as_deref(), Some("N1"));
    // The unanswered notice is no longer waiting.
    assert_eq!(harness.pending_records().await, vec!["N1".to_string()]);
}

#[tokio::test]
async fn test_cancelling_fresh_reschedule_sends_no_notice() {
    let harness = Harness::keyword();
    reschedule_requested(&harness).await;
    harness.clock.advance(Duration::hours(1));
    harness.created("N1", "Cardiology").await;
    let queued = harness.orchestrator.queue().status().queue_length;

    harness.clock.advance(Duration::hours(1));
    let outcome = harness.cancelled("N1", "Cardiology").await;
    assert_eq!(
        outcome,
        IntakeOutcome::SuppressedByAntiLoop {
            record_id: "N1".to_string()
        }
    );
    assert_eq!(harness.orchestrator.queue().status().queue_length, queued);
}

#[tokio::test]
async fn test_duplicate_event_sends_once() {
    let harness = Harness::keyword();
    let event = appointment("R1", "Cardiology", harness.now());

    let first = harness
        .orchestrator
        .handle_event(SchedulingEvent::AppointmentCreated(event.clone()))
        .await;
    let second = harness
        .orchestrator
        .handle_event(SchedulingEvent::AppointmentCreated(event))
        .await;

    assert!(matches!(first, IntakeOutcome::ConfirmationRequested { .. }));
    assert_eq!(second, IntakeOutcome::Duplicate);
    assert_eq!(harness.orchestrator.records().len().await, 1);
    assert_eq!(harness.orchestrator.queue().status().queue_length, 1);
}

#[tokio::test]
async fn test_ambiguous_reply_resends_oldest_only() {
    let classifier = Arc::new(ScriptedClassifier::new());
    let harness = Harness::new(classifier.clone());
    harness.created("A1", "Cardiology").await;
    harness.clock.advance(Duration::minutes(5));
    harness.created("A2", "Dermatology").await;
    let oldest = harness.orchestrator.queue().drain().remove(0);

    let outcome = harness.reply("1").await;
    assert_eq!(outcome.action, PipelineAction::AmbiguityClarification);
    assert_eq!(outcome.record_id.as_deref(), Some("A1"));
    assert_eq!(classifier.call_count(), 0);

    let items = harness.orchestrator.queue().drain();
    assert_eq!(items.len(), 2);
    // Greetings vary per send; the resent message is the same request.
    assert_eq!(items[1].payload.buttons, oldest.payload.buttons);
    assert!(items[1].payload.text.contains("Cardiology"));
    assert_eq!(harness.pending_records().await, vec!["A1".to_string(), "A2".to_string()]);
}

#[tokio::test]
async fn test_declined_then_cancelled_by_operator() {
    let harness = Harness::keyword();
    harness.created("R1", "Cardiology").await;
    harness.reply("2").await;

    let record = harness
        .orchestrator
        .records()
        .get(FlowType::Confirmation, "R1")
        .await
        .unwrap();
    assert_eq!(record.badge, Some(Badge::CancelInSource));

    harness.clock.advance(Duration::hours(3));
    let outcome = harness.cancelled("R1", "Cardiology").await;
    assert!(matches!(outcome, IntakeOutcome::DeclineResolved { .. }));
    let record = harness
        .orchestrator
        .records()
        .get(FlowType::Confirmation, "R1")
        .await
        .unwrap();
    assert_eq!(record.badge, Some(Badge::Cancelled));
    assert!(harness.pending_records().await.is_empty());
}
