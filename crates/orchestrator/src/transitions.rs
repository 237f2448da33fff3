//! Status and badge state machine.
//!
//! A patient reply moves a `pending` record to the status named by its intent.
//! Some replies also raise an operator badge (red, "pending action"); the
//! badge is later resolved (green) by the connector or by the linker. Badges
//! only ever move forward.

use std::fmt;

use reply_core::{FlowType, Intent, ReplyTemplates};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Status of a tracked record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Confirmed,
    Declined,
    NotScheduled,
    WantsReschedule,
    PatientInitiatedCancel,
    NoRescheduleWanted,
    /// Cancelled in the scheduling system without a reply from the patient.
    Cancelled,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Declined => "declined",
            Self::NotScheduled => "not_scheduled",
            Self::WantsReschedule => "wants_reschedule",
            Self::PatientInitiatedCancel => "patient_initiated_cancel",
            Self::NoRescheduleWanted => "no_reschedule_wanted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Status reached by a reply carrying `intent`.
    pub fn from_intent(intent: Intent) -> Option<Self> {
        match intent {
            Intent::Confirmed => Some(Self::Confirmed),
            Intent::Declined => Some(Self::Declined),
            Intent::NotScheduled => Some(Self::NotScheduled),
            Intent::WantsReschedule => Some(Self::WantsReschedule),
            Intent::PatientInitiatedCancel => Some(Self::PatientInitiatedCancel),
            Intent::NoRescheduleWanted => Some(Self::NoRescheduleWanted),
            Intent::HumanAgent | Intent::FreeTalk | Intent::Unknown => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeColor {
    Red,
    Green,
}

/// Operator-facing marker of an external action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    /// The appointment must be cancelled in the scheduling system.
    CancelInSource,
    /// The appointment was cancelled in the scheduling system.
    Cancelled,
    /// The patient is waiting for a new date.
    Reschedule,
    /// A new date was found and the patient was notified.
    Rescheduled,
}

impl Badge {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CancelInSource => "pending-action:cancel-in-source-system",
            Self::Cancelled => "resolved:cancelled",
            Self::Reschedule => "pending-action:reschedule",
            Self::Rescheduled => "resolved:rescheduled",
        }
    }

    /// Label shown on the operator dashboard.
    pub fn label(self) -> &'static str {
        match self {
            Self::CancelInSource => "Desmarcar",
            Self::Cancelled => "Desmarcada",
            Self::Reschedule => "Reagendar",
            Self::Rescheduled => "Reagendada",
        }
    }

    pub fn color(self) -> BadgeColor {
        if self.is_pending_action() {
            BadgeColor::Red
        } else {
            BadgeColor::Green
        }
    }

    pub fn is_pending_action(self) -> bool {
        matches!(self, Self::CancelInSource | Self::Reschedule)
    }

    /// The resolved badge that follows this one, if any.
    pub fn resolution(self) -> Option<Badge> {
        match self {
            Self::CancelInSource => Some(Self::Cancelled),
            Self::Reschedule => Some(Self::Rescheduled),
            Self::Cancelled | Self::Rescheduled => None,
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a badge may move from `from` to `to`.
pub fn can_transition(from: Badge, to: Badge) -> bool {
    from.resolution() == Some(to)
}

/// Work that must happen outside the record after a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FollowUp {
    /// An operator must cancel the appointment in the scheduling system. No
    /// separate cancellation notice is sent to the patient.
    CancelInSourceSystem { record_id: String },
    /// Track the wish to reschedule so the linker can match a new date.
    RegisterRescheduleRequest { record_id: String },
}

/// Result of applying a validated intent to a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub new_status: RecordStatus,
    pub badge: Option<Badge>,
    pub auto_reply: String,
    pub follow_up: Vec<FollowUp>,
}

/// Compute the transition for a reply. Nothing is mutated here.
///
/// Only `pending` records accept replies, and only intents of the record's
/// own flow are accepted.
pub fn apply(
    flow: FlowType,
    record_id: &str,
    status: RecordStatus,
    intent: Intent,
    templates: &ReplyTemplates,
) -> Result<TransitionOutcome> {
    if status != RecordStatus::Pending {
        return Err(OrchestratorError::TransitionRejected {
            record_id: record_id.to_string(),
            reason: format!("record is {status}, not pending"),
        });
    }
    if !intent.is_compatible_with(flow) {
        return Err(OrchestratorError::TransitionRejected {
            record_id: record_id.to_string(),
            reason: format!("intent {intent} does not answer a {flow} message"),
        });
    }

    let (new_status, auto_reply) = match (
        RecordStatus::from_intent(intent),
        templates.acknowledgement(intent),
    ) {
        (Some(status), Some(reply)) => (status, reply.to_string()),
        _ => {
            return Err(OrchestratorError::TransitionRejected {
                record_id: record_id.to_string(),
                reason: format!("intent {intent} has no transition"),
            })
        }
    };

    let (badge, follow_up) = match intent {
        Intent::Declined => (
            Some(Badge::CancelInSource),
            vec![FollowUp::CancelInSourceSystem {
                record_id: record_id.to_string(),
            }],
        ),
        Intent::WantsReschedule => (
            Some(Badge::Reschedule),
            vec![FollowUp::RegisterRescheduleRequest {
                record_id: record_id.to_string(),
            }],
        ),
        _ => (None, Vec::new()),
    };

    Ok(TransitionOutcome {
        new_status,
        badge,
        auto_reply,
        follow_up,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_BADGES: [Badge; 4] = [
        Badge::CancelInSource,
        Badge::Cancelled,
        Badge::Reschedule,
        Badge::Rescheduled,
    ];

    #[test]
    fn test_badge_monotonicity() {
        assert!(can_transition(Badge::CancelInSource, Badge::Cancelled));
        assert!(can_transition(Badge::Reschedule, Badge::Rescheduled));
        assert!(!can_transition(Badge::Cancelled, Badge::CancelInSource));

        let allowed = ALL_BADGES
            .iter()
            .flat_map(|from| ALL_BADGES.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| can_transition(*from, *to))
            .count();
        assert_eq!(allowed, 2);
    }

    #[test]
    fn test_badge_labels_and_colors() {
        assert_eq!(Badge::CancelInSource.label(), "Desmarcar");
        assert_eq!(Badge::Cancelled.label(), "Desmarcada");
        assert_eq!(Badge::Reschedule.color(), BadgeColor::Red);
        assert_eq!(Badge::Rescheduled.color(), BadgeColor::Green);
    }

    #[test]
    fn test_confirmation_flow_transitions() {
        let templates = ReplyTemplates::default();
        let confirmed = apply(
            FlowType::Confirmation,
            "R1",
            RecordStatus::Pending,
            Intent::Confirmed,
            &templates,
        )
        .unwrap();
        assert_eq!(confirmed.new_status, RecordStatus::Confirmed);
        assert_eq!(confirmed.badge, None);
        assert_eq!(confirmed.auto_reply, templates.ack_confirmed);

        let declined = apply(
            FlowType::Confirmation,
            "R1",
            RecordStatus::Pending,
            Intent::Declined,
            &templates,
        )
        .unwrap();
        assert_eq!(declined.badge, Some(Badge::CancelInSource));
        assert_eq!(
            declined.follow_up,
            vec![FollowUp::CancelInSourceSystem {
                record_id: "R1".to_string()
            }]
        );

        let not_scheduled = apply(
            FlowType::Confirmation,
            "R1",
            RecordStatus::Pending,
            Intent::NotScheduled,
            &templates,
        )
        .unwrap();
        assert_eq!(not_scheduled.new_status, RecordStatus::NotScheduled);
        assert_eq!(not_scheduled.badge, None);
    }

    #[test]
    fn test_cancellation_flow_transitions() {
        let templates = ReplyTemplates::default();
        let reschedule = apply(
            FlowType::Cancellation,
            "R2",
            RecordStatus::Pending,
            Intent::WantsReschedule,
            &templates,
        )
        .unwrap();
        assert_eq!(reschedule.badge, Some(Badge::Reschedule));
        assert_eq!(reschedule.follow_up.len(), 1);

        for intent in [Intent::PatientInitiatedCancel, Intent::NoRescheduleWanted] {
            let outcome = apply(
                FlowType::Cancellation,
                "R2",
                RecordStatus::Pending,
                intent,
                &templates,
            )
            .unwrap();
            assert_eq!(outcome.badge, None);
            assert!(!outcome.auto_reply.is_empty());
        }
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let templates = ReplyTemplates::default();
        let wrong_flow = apply(
            FlowType::Confirmation,
            "R1",
            RecordStatus::Pending,
            Intent::WantsReschedule,
            &templates,
        );
        assert!(matches!(
            wrong_flow,
            Err(OrchestratorError::TransitionRejected { .. })
        ));

        let already_answered = apply(
            FlowType::Confirmation,
            "R1",
            RecordStatus::Confirmed,
            Intent::Declined,
            &templates,
        );
        assert!(already_answered.is_err());

        let free_talk = apply(
            FlowType::Confirmation,
            "R1",
            RecordStatus::Pending,
            Intent::FreeTalk,
            &templates,
        );
        assert!(free_talk.is_err());
    }
}
