//! Reschedule linker.
//!
//! Binds a newly created appointment to an earlier cancellation when the
//! patient asked to reschedule (primary pathway) or when an operator
//! rescheduled without waiting for a reply (secondary pathway).

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use conversation_store::{ContactSession, RescheduleRequest};
use reply_core::{AppointmentEvent, FlowType, OutboundPayload, PatientIdentity};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditKind};
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::records::TrackedRecord;
use crate::transitions::Badge;

/// Result of trying to link one new appointment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LinkOutcome {
    /// The appointment has no usable phone number.
    NoContact,
    NoMatch,
    Linked {
        /// The reschedule request that was fulfilled; `None` on the secondary pathway.
        request_id: Option<String>,
        original_record_id: String,
        new_record_id: String,
        /// Queue id of the new-date confirmation, if one was sent.
        new_date_message: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl LinkOutcome {
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked { .. })
    }
}

/// Link counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub total_links: u64,
    pub links_last_24h: u64,
    pub new_date_messages_sent: u64,
}

#[derive(Debug, Default)]
pub(crate) struct LinkLedger {
    total: u64,
    new_date_sent: u64,
    recent: VecDeque<DateTime<Utc>>,
}

impl LinkLedger {
    fn observe(&mut self, at: DateTime<Utc>, new_date_sent: bool) {
        self.total += 1;
        if new_date_sent {
            self.new_date_sent += 1;
        }
        self.recent.push_back(at);
    }

    fn stats(&mut self, now: DateTime<Utc>) -> LinkStats {
        let cutoff = now - Duration::hours(24);
        while self.recent.front().is_some_and(|at| *at < cutoff) {
            self.recent.pop_front();
        }
        LinkStats {
            total_links: self.total,
            links_last_24h: self.recent.len() as u64,
            new_date_messages_sent: self.new_date_sent,
        }
    }
}

impl Orchestrator {
    pub fn link_stats(&self) -> LinkStats {
        let now = self.clock.now();
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stats(now)
    }

    /// Try to bind a new appointment to an earlier cancellation of the same
    /// patient and specialty.
    pub async fn link_appointment(&self, event: &AppointmentEvent) -> LinkOutcome {
        let Some(contact) = event.contact() else {
            return LinkOutcome::NoContact;
        };

        let mut session = self.store.session(&contact).await;
        let now = session.now();
        let window = self.store.windows().reschedule_window;

        let mut matching: Vec<RescheduleRequest> = Vec::new();
        for request in session.pending_reschedule_requests(&event.specialty, window, now) {
            if self.request_matches(&request, &event.patient).await {
                matching.push(request);
            }
        }

        let outcome = match matching.first() {
            Some(request) => {
                if matching.len() > 1 {
                    let err = OrchestratorError::AmbiguousLink {
                        appointment_id: event.record_id.clone(),
                        candidates: matching.len(),
                    };
                    self.report_integrity(&contact, &event.record_id, &err).await;
                }
                self.link_request(&mut session, request, event).await
            }
            None => self.link_recent_cancellation(&mut session, event).await,
        };
        session.commit().await;

        if let LinkOutcome::Linked {
            original_record_id,
            new_date_message,
            ..
        } = &outcome
        {
            self.links
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .observe(now, new_date_message.is_some());
            info!(
                contact = %contact,
                "Linked appointment {} to cancelled {}",
                event.record_id,
                original_record_id
            );
            self.audit
                .record(
                    AuditEntry::new(AuditKind::Link, now)
                        .contact(&contact)
                        .record(event.record_id.clone())
                        .action(format!("linked:{original_record_id}")),
                )
                .await;
        }
        outcome
    }

    /// Requests carry the patient identity; legacy ones are checked against
    /// the identity of the cancelled record.
    async fn request_matches(&self, request: &RescheduleRequest, patient: &PatientIdentity) -> bool {
        if !request.patient.is_empty() {
            return request.patient.matches(patient);
        }
        match self
            .records
            .get(FlowType::Cancellation, &request.original_record_id)
            .await
        {
            Ok(original) => original.patient.matches(patient),
            Err(err) => {
                debug!(request = %request.request_id, "Legacy request without record: {}", err);
                false
            }
        }
    }

    async fn link_request(
        &self,
        session: &mut ContactSession,
        request: &RescheduleRequest,
        event: &AppointmentEvent,
    ) -> LinkOutcome {
        let now = session.now();
        let contact = session.contact.clone();
        let original = request.original_record_id.clone();

        if let Err(err) = session.fulfill_reschedule_request(&request.request_id, &event.record_id, now) {
            return LinkOutcome::Failed {
                error: err.to_string(),
            };
        }

        if let Err(err) = self
            .records
            .resolve_badge(FlowType::Cancellation, &original, Badge::Rescheduled)
            .await
        {
            self.report_integrity(&contact, &original, &err).await;
        }

        self.finish_link(session, Some(request.request_id.clone()), &original, event)
            .await
    }

    async fn link_recent_cancellation(
        &self,
        session: &mut ContactSession,
        event: &AppointmentEvent,
    ) -> LinkOutcome {
        let now = session.now();
        let contact = session.contact.clone();
        let window = self.store.windows().reschedule_window;

        let candidates = self
            .records
            .recent_unlinked_cancellations(&event.patient, &event.specialty, window)
            .await;
        let Some(original) = candidates
            .into_iter()
            .find(|record| record.record_id != event.record_id)
        else {
            return LinkOutcome::NoMatch;
        };

        if original.badge == Some(Badge::Reschedule) {
            if let Err(err) = self
                .records
                .resolve_badge(FlowType::Cancellation, &original.record_id, Badge::Rescheduled)
                .await
            {
                self.report_integrity(&contact, &original.record_id, &err).await;
            }
        }

        // The cancellation notice no longer needs an answer.
        session.mark_responded(&original.record_id, now);
        self.finish_link(session, None, &original.record_id, event).await
    }

    async fn finish_link(
        &self,
        session: &mut ContactSession,
        request_id: Option<String>,
        original_record_id: &str,
        event: &AppointmentEvent,
    ) -> LinkOutcome {
        let now = session.now();
        session.mark_appointment_as_reschedule(
            &event.record_id,
            original_record_id,
            self.store.windows().anti_loop_ttl,
            now,
        );

        let already_notified = self
            .records
            .get(FlowType::Cancellation, original_record_id)
            .await
            .map(|record| record.new_date_notified)
            .unwrap_or(false);

        let new_date_message = if already_notified {
            debug!(record = %original_record_id, "New-date confirmation already sent");
            None
        } else {
            let record = match self.records.get(FlowType::Confirmation, &event.record_id).await {
                Ok(record) => record,
                Err(_) => {
                    self.records
                        .insert(TrackedRecord::from_event(FlowType::Confirmation, event, now))
                        .await
                }
            };
            let text = self.templates.new_date_confirmation(
                record.display_name(),
                &record.specialty,
                event.scheduled_at,
            );
            let payload = OutboundPayload::text(text)
                .with_buttons(self.templates.buttons(FlowType::Confirmation));
            match self.send_system_message(session, FlowType::Confirmation, &record, payload) {
                Ok(id) => Some(id),
                Err(err) => {
                    warn!(record = %event.record_id, "Failed to queue new-date confirmation: {}", err);
                    None
                }
            }
        };

        if let Err(err) = self
            .records
            .link(original_record_id, &event.record_id, new_date_message.is_some())
            .await
        {
            warn!(record = %original_record_id, "Failed to record link: {}", err);
        }

        LinkOutcome::Linked {
            request_id,
            original_record_id: original_record_id.to_string(),
            new_record_id: event.record_id.clone(),
            new_date_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_window() {
        let now = Utc::now();
        let mut ledger = LinkLedger::default();
        ledger.observe(now - Duration::hours(30), true);
        ledger.observe(now - Duration::hours(2), false);

        let stats = ledger.stats(now);
        assert_eq!(stats.total_links, 2);
        assert_eq!(stats.links_last_24h, 1);
        assert_eq!(stats.new_date_messages_sent, 1);
    }
}
