//! Appointment intake.
//!
//! Turns scheduling events reported by the connector into tracked records
//! and the outbound messages that open a conversation about them.

use reply_core::{AppointmentEvent, FlowType, OutboundPayload, SchedulingEvent};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditKind};
use crate::error::Result;
use crate::linker::LinkOutcome;
use crate::orchestrator::Orchestrator;
use crate::records::TrackedRecord;
use crate::transitions::Badge;

/// What intake did with one scheduling event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IntakeOutcome {
    /// The connector reported this event before.
    Duplicate,
    Rejected {
        reason: String,
    },
    /// The record is tracked but nobody can be messaged about it.
    NoContact {
        record_id: String,
    },
    ConfirmationRequested {
        record_id: String,
        queue_id: String,
    },
    /// The new appointment replaced an earlier cancellation.
    Linked(LinkOutcome),
    CancellationNoticeSent {
        record_id: String,
        queue_id: String,
    },
    /// A decline answered in chat was carried out by the operator.
    DeclineResolved {
        record_id: String,
    },
    /// The cancellation is part of a reschedule already handled.
    SuppressedByAntiLoop {
        record_id: String,
    },
    Failed {
        error: String,
    },
}

impl Orchestrator {
    /// Handle one scheduling event.
    pub async fn handle_event(&self, event: SchedulingEvent) -> IntakeOutcome {
        if let Err(err) = event.validate() {
            warn!("Rejected scheduling event: {}", err);
            return IntakeOutcome::Rejected {
                reason: err.to_string(),
            };
        }

        let appointment = event.appointment();
        if !self
            .records
            .register_fingerprint(event.kind(), appointment)
            .await
        {
            debug!(record = %appointment.record_id, kind = event.kind(), "Duplicate event");
            return IntakeOutcome::Duplicate;
        }

        let result = match &event {
            SchedulingEvent::AppointmentCreated(a) => self.appointment_created(a).await,
            SchedulingEvent::AppointmentCancelled(a) => self.appointment_cancelled(a).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(record = %appointment.record_id, "Intake failed: {}", err);
                IntakeOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    async fn appointment_created(&self, event: &AppointmentEvent) -> Result<IntakeOutcome> {
        let now = self.clock.now();
        let record = self
            .records
            .insert(TrackedRecord::from_event(FlowType::Confirmation, event, now))
            .await;

        let Some(contact) = event.contact() else {
            info!(record = %event.record_id, "Appointment has no usable phone number");
            return Ok(IntakeOutcome::NoContact {
                record_id: event.record_id.clone(),
            });
        };

        let link = self.link_appointment(event).await;
        if link.is_linked() {
            return Ok(IntakeOutcome::Linked(link));
        }

        let mut session = self.store.session(&contact).await;
        let now = session.now();
        session.attach_patient(&event.patient, now);

        let text = self.templates.confirmation_request(
            record.display_name(),
            &record.specialty,
            record.scheduled_at,
        );
        let payload =
            OutboundPayload::text(text).with_buttons(self.templates.buttons(FlowType::Confirmation));
        let sent = self.send_system_message(&mut session, FlowType::Confirmation, &record, payload);
        session.commit().await;
        let queue_id = sent?;

        self.audit_outbound(&contact, &record.record_id, "confirmation_request")
            .await;
        Ok(IntakeOutcome::ConfirmationRequested {
            record_id: record.record_id,
            queue_id,
        })
    }

    async fn appointment_cancelled(&self, event: &AppointmentEvent) -> Result<IntakeOutcome> {
        let cancelled_at = event.cancelled_at.unwrap_or_else(|| self.clock.now());
        let confirmation = self
            .records
            .get(FlowType::Confirmation, &event.record_id)
            .await
            .ok();

        // The patient declined in chat and the operator cancelled it.
        if let Some(record) = &confirmation {
            if record.badge == Some(Badge::CancelInSource) && record.replied_via_chat {
                self.records
                    .resolve_badge(FlowType::Confirmation, &record.record_id, Badge::Cancelled)
                    .await?;
                self.records
                    .mark_cancelled_in_source(FlowType::Confirmation, &record.record_id, cancelled_at)
                    .await?;
                info!(record = %record.record_id, "Decline carried out in the scheduling system");
                return Ok(IntakeOutcome::DeclineResolved {
                    record_id: record.record_id.clone(),
                });
            }
        }

        if confirmation.is_some() {
            self.records
                .mark_cancelled_in_source(FlowType::Confirmation, &event.record_id, cancelled_at)
                .await?;
        }

        let Some(contact) = event.contact() else {
            self.records
                .insert(TrackedRecord::from_event(FlowType::Cancellation, event, self.clock.now()))
                .await;
            return Ok(IntakeOutcome::NoContact {
                record_id: event.record_id.clone(),
            });
        };

        let mut session = self.store.session(&contact).await;
        let now = session.now();

        if session.is_recent_reschedule(&event.record_id, now)
            || session.is_replaced_appointment(&event.record_id, now)
        {
            session.mark_responded(&event.record_id, now);
            session.commit().await;
            info!(record = %event.record_id, "Cancellation belongs to a reschedule; no notice sent");
            return Ok(IntakeOutcome::SuppressedByAntiLoop {
                record_id: event.record_id.clone(),
            });
        }

        let record = self
            .records
            .insert(TrackedRecord::from_event(FlowType::Cancellation, event, now))
            .await;
        session.attach_patient(&event.patient, now);

        let text = self.templates.cancellation_notice(
            record.display_name(),
            &record.specialty,
            record.scheduled_at,
        );
        let payload =
            OutboundPayload::text(text).with_buttons(self.templates.buttons(FlowType::Cancellation));
        // Replaces a confirmation request still waiting for the same record.
        let sent = self.send_system_message(&mut session, FlowType::Cancellation, &record, payload);
        session.commit().await;
        let queue_id = sent?;

        self.audit_outbound(&contact, &record.record_id, "cancellation_notice")
            .await;
        Ok(IntakeOutcome::CancellationNoticeSent {
            record_id: record.record_id,
            queue_id,
        })
    }

    async fn audit_outbound(&self, contact: &reply_core::ContactId, record_id: &str, action: &str) {
        self.audit
            .record(
                AuditEntry::new(AuditKind::Outbound, self.clock.now())
                    .contact(contact)
                    .record(record_id)
                    .action(action),
            )
            .await;
    }
}
