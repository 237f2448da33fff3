//! State kept for one contact.
//!
//! Every method takes the current time explicitly; the store supplies it from
//! its clock. Nothing here locks or persists.

use chrono::{DateTime, Duration, Utc};
use reply_core::{specialty_matches, ContactId, Intent, IntentClassification, PatientIdentity, SystemMessage};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Lifecycle of a reschedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Fulfilled,
    Cancelled,
}

/// A patient's wish to reschedule after a cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub request_id: String,
    pub original_record_id: String,
    pub specialty: String,
    /// Empty for legacy requests registered before identities were tracked.
    #[serde(default)]
    pub patient: PatientIdentity,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(default)]
    pub fulfilled_by: Option<String>,
    #[serde(default)]
    pub fulfilled_at: Option<DateTime<Utc>>,
}

/// Marks an appointment as the product of a reschedule, for a limited time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleMarker {
    pub new_appointment_id: String,
    pub original_appointment_id: String,
    pub expires_at: DateTime<Utc>,
}

/// The latest inbound message, as classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundSummary {
    pub text: String,
    pub intent: Option<Intent>,
    pub confidence: Option<f64>,
    pub received_at: DateTime<Utc>,
}

/// Result of an ambiguity check.
#[derive(Debug, Clone, PartialEq)]
pub struct AmbiguityCheck {
    pub ambiguous: bool,
    pub pending_count: usize,
    /// Oldest first.
    pub pending: Vec<SystemMessage>,
}

/// Everything known about one contact's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub contact: ContactId,
    #[serde(default)]
    pub patient: PatientIdentity,
    pub last_system_message: Option<SystemMessage>,
    /// Unanswered system messages, ordered by `sent_at`.
    pub pending: Vec<SystemMessage>,
    pub last_inbound: Option<InboundSummary>,
    pub inbound_count: u64,
    pub outbound_count: u64,
    /// Consecutive replies that could not be acted on.
    pub failed_attempts: u32,
    pub reschedule_requests: Vec<RescheduleRequest>,
    pub recent_reschedules: Vec<RescheduleMarker>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(contact: ContactId, now: DateTime<Utc>) -> Self {
        Self {
            contact,
            patient: PatientIdentity::default(),
            last_system_message: None,
            pending: Vec::new(),
            last_inbound: None,
            inbound_count: 0,
            outbound_count: 0,
            failed_attempts: 0,
            reschedule_requests: Vec::new(),
            recent_reschedules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill in identity fields that are still unknown.
    pub fn attach_patient(&mut self, patient: &PatientIdentity, now: DateTime<Utc>) {
        if self.patient.record_number.is_none() {
            self.patient.record_number = patient.record_number.clone();
        }
        if self.patient.patient_id.is_none() {
            self.patient.patient_id = patient.patient_id.clone();
        }
        self.updated_at = now;
    }

    /// Track a newly sent system message.
    ///
    /// A pending message for the same record is replaced, so a record never
    /// has more than one unanswered message.
    pub fn register_system_message(&mut self, message: SystemMessage, now: DateTime<Utc>) {
        self.pending.retain(|m| m.record_id != message.record_id);
        let at = self
            .pending
            .partition_point(|m| m.sent_at <= message.sent_at);
        self.pending.insert(at, message.clone());
        self.last_system_message = Some(message);
        self.outbound_count += 1;
        self.updated_at = now;
    }

    pub fn register_inbound(
        &mut self,
        text: &str,
        classification: Option<&IntentClassification>,
        now: DateTime<Utc>,
    ) {
        self.last_inbound = Some(InboundSummary {
            text: text.to_string(),
            intent: classification.map(|c| c.intent),
            confidence: classification.map(|c| c.confidence),
            received_at: now,
        });
        self.inbound_count += 1;
        self.updated_at = now;
    }

    /// Mark the pending message for `record_id` as answered.
    pub fn mark_responded(&mut self, record_id: &str, now: DateTime<Utc>) -> Option<SystemMessage> {
        let index = self.pending.iter().position(|m| m.record_id == record_id)?;
        let mut message = self.pending.remove(index);
        message.responded = true;
        message.responded_at = Some(now);

        if let Some(last) = self.last_system_message.as_mut() {
            if last.id == message.id {
                last.responded = true;
                last.responded_at = Some(now);
            }
        }
        self.updated_at = now;
        Some(message)
    }

    pub fn check_ambiguity(&self) -> AmbiguityCheck {
        AmbiguityCheck {
            ambiguous: self.pending.len() > 1,
            pending_count: self.pending.len(),
            pending: self.pending.clone(),
        }
    }

    /// Oldest unanswered message.
    pub fn next_pending(&self) -> Option<&SystemMessage> {
        self.pending.first()
    }

    pub fn increment_failed_attempts(&mut self, now: DateTime<Utc>) -> u32 {
        self.failed_attempts += 1;
        self.updated_at = now;
        self.failed_attempts
    }

    pub fn reset_failed_attempts(&mut self, now: DateTime<Utc>) {
        self.failed_attempts = 0;
        self.updated_at = now;
    }

    /// Register a reschedule wish. An open request for the same record is reused.
    pub fn register_reschedule_request(
        &mut self,
        original_record_id: &str,
        specialty: &str,
        patient: &PatientIdentity,
        now: DateTime<Utc>,
    ) -> RescheduleRequest {
        if let Some(existing) = self.reschedule_requests.iter().find(|r| {
            r.original_record_id == original_record_id && r.status == RequestStatus::Pending
        }) {
            return existing.clone();
        }

        let request = RescheduleRequest {
            request_id: format!("rr_{}", uuid::Uuid::new_v4().simple()),
            original_record_id: original_record_id.to_string(),
            specialty: specialty.to_string(),
            patient: patient.clone(),
            created_at: now,
            status: RequestStatus::Pending,
            fulfilled_by: None,
            fulfilled_at: None,
        };
        self.reschedule_requests.push(request.clone());
        self.updated_at = now;
        request
    }

    /// Pending requests for `specialty` no older than `window`, oldest first.
    pub fn pending_reschedule_requests(
        &self,
        specialty: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<RescheduleRequest> {
        let mut requests: Vec<RescheduleRequest> = self
            .reschedule_requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .filter(|r| specialty_matches(&r.specialty, specialty))
            .filter(|r| now - r.created_at <= window)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    /// Bind a request to the appointment that satisfies it.
    pub fn fulfill_reschedule_request(
        &mut self,
        request_id: &str,
        new_appointment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RescheduleRequest> {
        let request = self
            .reschedule_requests
            .iter_mut()
            .find(|r| r.request_id == request_id)
            .ok_or_else(|| StoreError::RequestNotFound(request_id.to_string()))?;

        if request.status != RequestStatus::Pending {
            return Err(StoreError::RequestClosed(request_id.to_string()));
        }

        request.status = RequestStatus::Fulfilled;
        request.fulfilled_by = Some(new_appointment_id.to_string());
        request.fulfilled_at = Some(now);
        let fulfilled = request.clone();
        self.updated_at = now;
        Ok(fulfilled)
    }

    /// Close pending requests older than `window`. Returns how many were closed.
    pub fn expire_reschedule_requests(&mut self, window: Duration, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for request in &mut self.reschedule_requests {
            if request.status == RequestStatus::Pending && now - request.created_at > window {
                request.status = RequestStatus::Cancelled;
                expired += 1;
            }
        }
        expired
    }

    pub fn mark_appointment_as_reschedule(
        &mut self,
        new_appointment_id: &str,
        original_appointment_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        self.recent_reschedules.retain(|m| m.expires_at > now);
        self.recent_reschedules
            .retain(|m| m.new_appointment_id != new_appointment_id);
        self.recent_reschedules.push(RescheduleMarker {
            new_appointment_id: new_appointment_id.to_string(),
            original_appointment_id: original_appointment_id.to_string(),
            expires_at: now + ttl,
        });
        self.updated_at = now;
    }

    /// Whether `appointment_id` was produced by a reschedule that is still fresh.
    pub fn is_recent_reschedule(&self, appointment_id: &str, now: DateTime<Utc>) -> bool {
        self.recent_reschedules
            .iter()
            .any(|m| m.new_appointment_id == appointment_id && m.expires_at > now)
    }

    /// Whether `appointment_id` was replaced by a reschedule that is still fresh.
    pub fn is_replaced_appointment(&self, appointment_id: &str, now: DateTime<Utc>) -> bool {
        self.recent_reschedules
            .iter()
            .any(|m| m.original_appointment_id == appointment_id && m.expires_at > now)
    }

    pub fn has_open_reschedule_requests(&self) -> bool {
        self.reschedule_requests
            .iter()
            .any(|r| r.status == RequestStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reply_core::{FlowType, OutboundPayload};

    fn ctx(now: DateTime<Utc>) -> ConversationContext {
        ConversationContext::new(ContactId::parse("5511987654321").unwrap(), now)
    }

    fn message(record: &str, sent_at: DateTime<Utc>) -> SystemMessage {
        SystemMessage::new(
            format!("sm-{record}"),
            FlowType::Confirmation,
            record,
            format!("item {record}"),
            OutboundPayload::text("body"),
            sent_at,
        )
    }

    #[test]
    fn test_pending_ordered_and_unique_per_record() {
        let now = Utc::now();
        let mut c = ctx(now);

        c.register_system_message(message("R2", now), now);
        c.register_system_message(message("R1", now - Duration::minutes(5)), now);
        assert_eq!(c.next_pending().unwrap().record_id, "R1");
        assert_eq!(c.last_system_message.as_ref().unwrap().record_id, "R1");

        c.register_system_message(message("R2", now + Duration::minutes(1)), now);
        assert_eq!(c.pending.len(), 2);
        assert!(c.check_ambiguity().ambiguous);
    }

    #[test]
    fn test_mark_responded() {
        let now = Utc::now();
        let mut c = ctx(now);
        c.register_system_message(message("R1", now), now);

        let answered = c.mark_responded("R1", now).unwrap();
        assert!(answered.responded);
        assert!(c.pending.is_empty());
        assert!(c.last_system_message.as_ref().unwrap().responded);
        assert!(c.mark_responded("R1", now).is_none());
    }

    #[test]
    fn test_failed_attempts_counter() {
        let now = Utc::now();
        let mut c = ctx(now);
        assert_eq!(c.increment_failed_attempts(now), 1);
        assert_eq!(c.increment_failed_attempts(now), 2);
        c.reset_failed_attempts(now);
        assert_eq!(c.failed_attempts, 0);
    }

    #[test]
    fn test_reschedule_request_window() {
        let t0 = Utc::now();
        let mut c = ctx(t0);
        let patient = PatientIdentity::new(Some("P".to_string()), None);
        let request = c.register_reschedule_request("R2", "Cardiology", &patient, t0);

        let window = Duration::hours(72);
        assert_eq!(
            c.pending_reschedule_requests("cardiology", window, t0 + Duration::hours(71))
                .len(),
            1
        );
        assert!(c
            .pending_reschedule_requests("Cardiology", window, t0 + Duration::hours(73))
            .is_empty());
        assert!(c
            .pending_reschedule_requests("Dermatology", window, t0 + Duration::hours(1))
            .is_empty());

        let again = c.register_reschedule_request("R2", "Cardiology", &patient, t0);
        assert_eq!(again.request_id, request.request_id);
    }

    #[test]
    fn test_request_fulfilled_once() {
        let now = Utc::now();
        let mut c = ctx(now);
        let request = c.register_reschedule_request("R2", "Cardiology", &PatientIdentity::default(), now);

        let fulfilled = c
            .fulfill_reschedule_request(&request.request_id, "N1", now)
            .unwrap();
        assert_eq!(fulfilled.status, RequestStatus::Fulfilled);
        assert_eq!(fulfilled.fulfilled_by.as_deref(), Some("N1"));

        let second = c.fulfill_reschedule_request(&request.request_id, "N2", now);
        assert!(matches!(second, Err(StoreError::RequestClosed(_))));
        assert!(matches!(
            c.fulfill_reschedule_request("missing", "N2", now),
            Err(StoreError::RequestNotFound(_))
        ));
    }

    #[test]
    fn test_expire_requests() {
        let t0 = Utc::now();
        let mut c = ctx(t0);
        c.register_reschedule_request("R2", "Cardiology", &PatientIdentity::default(), t0);
        assert_eq!(c.expire_reschedule_requests(Duration::hours(72), t0 + Duration::hours(80)), 1);
        assert!(!c.has_open_reschedule_requests());
    }

    #[test]
    fn test_anti_loop_marker_expires() {
        let t0 = Utc::now();
        let mut c = ctx(t0);
        c.mark_appointment_as_reschedule("N1", "R2", Duration::hours(48), t0);

        assert!(c.is_recent_reschedule("N1", t0 + Duration::hours(47)));
        assert!(!c.is_recent_reschedule("N1", t0 + Duration::hours(49)));
        assert!(!c.is_recent_reschedule("R2", t0));
        assert!(c.is_replaced_appointment("R2", t0));
    }
}
