//! Scheduling events reported by the scheduling-system connector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::ContactId;
use crate::error::CoreError;

/// Identity fields used to match a patient across records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatientIdentity {
    /// Medical record number.
    #[serde(default)]
    pub record_number: Option<String>,
    /// Internal patient id of the scheduling system.
    #[serde(default)]
    pub patient_id: Option<String>,
}

impl PatientIdentity {
    pub fn new(record_number: Option<String>, patient_id: Option<String>) -> Self {
        Self {
            record_number: record_number.filter(|v| !v.trim().is_empty()),
            patient_id: patient_id.filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record_number.is_none() && self.patient_id.is_none()
    }

    /// Two identities match when any field present on both sides is equal.
    pub fn matches(&self, other: &PatientIdentity) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| match (a, b) {
            (Some(a), Some(b)) => a.trim() == b.trim(),
            _ => false,
        };
        same(&self.record_number, &other.record_number) || same(&self.patient_id, &other.patient_id)
    }
}

/// Case and whitespace insensitive specialty comparison.
pub fn specialty_matches(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// One appointment as reported by the connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentEvent {
    pub record_id: String,
    pub patient: PatientIdentity,
    #[serde(default)]
    pub patient_name: Option<String>,
    pub specialty: String,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Raw phone numbers, best first.
    #[serde(default)]
    pub phones: Vec<String>,
}

impl AppointmentEvent {
    /// First phone that normalizes to a valid contact.
    pub fn contact(&self) -> Option<ContactId> {
        self.phones.iter().find_map(|p| ContactId::parse(p).ok())
    }

    /// Stable key used to detect the connector reporting the same event twice.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.record_id,
            self.scheduled_at.to_rfc3339(),
            self.created_at.to_rfc3339()
        )
    }

    fn validate_common(&self) -> Result<(), CoreError> {
        if self.record_id.trim().is_empty() {
            return Err(CoreError::InvalidEvent("missing record id".to_string()));
        }
        if self.specialty.trim().is_empty() {
            return Err(CoreError::InvalidEvent(format!(
                "record {} has no specialty",
                self.record_id
            )));
        }
        if self.patient.is_empty() {
            return Err(CoreError::InvalidEvent(format!(
                "record {} has no patient identity",
                self.record_id
            )));
        }
        Ok(())
    }
}

/// Tagged scheduling events accepted at the connector boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulingEvent {
    AppointmentCreated(AppointmentEvent),
    AppointmentCancelled(AppointmentEvent),
}

impl SchedulingEvent {
    pub fn appointment(&self) -> &AppointmentEvent {
        match self {
            Self::AppointmentCreated(a) | Self::AppointmentCancelled(a) => a,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AppointmentCreated(_) => "appointment_created",
            Self::AppointmentCancelled(_) => "appointment_cancelled",
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let appointment = self.appointment();
        appointment.validate_common()?;

        if let Self::AppointmentCancelled(a) = self {
            if a.cancelled_at.is_none() {
                return Err(CoreError::InvalidEvent(format!(
                    "cancellation of {} has no cancellation time",
                    a.record_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn appointment() -> AppointmentEvent {
        AppointmentEvent {
            record_id: "A-100".to_string(),
            patient: PatientIdentity::new(Some("123456".to_string()), None),
            patient_name: Some("Maria".to_string()),
            specialty: "Cardiology".to_string(),
            scheduled_at: Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            cancelled_at: None,
            phones: vec!["abc".to_string(), "11987654321".to_string()],
        }
    }

    #[test]
    fn test_tagged_deserialization() {
        let json = serde_json::json!({
            "type": "appointment_cancelled",
            "record_id": "A-1",
            "patient": { "record_number": "99" },
            "specialty": "Dermatology",
            "scheduled_at": "2026-03-10T14:00:00Z",
            "created_at": "2026-03-01T09:00:00Z",
            "cancelled_at": "2026-03-02T09:00:00Z"
        });
        let event: SchedulingEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.kind(), "appointment_cancelled");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_cancellation_requires_time() {
        let event = SchedulingEvent::AppointmentCancelled(appointment());
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_missing_identity_rejected() {
        let mut a = appointment();
        a.patient = PatientIdentity::new(Some("  ".to_string()), None);
        assert!(SchedulingEvent::AppointmentCreated(a).validate().is_err());
    }

    #[test]
    fn test_contact_skips_invalid_phones() {
        assert_eq!(appointment().contact().unwrap().as_str(), "5511987654321");
    }

    #[test]
    fn test_identity_matching() {
        let a = PatientIdentity::new(Some("1".to_string()), Some("x".to_string()));
        let b = PatientIdentity::new(None, Some("x".to_string()));
        let c = PatientIdentity::new(Some("2".to_string()), None);
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        assert!(!PatientIdentity::default().matches(&PatientIdentity::default()));
    }

    #[test]
    fn test_specialty_matches() {
        assert!(specialty_matches(" Cardiology", "cardiology "));
        assert!(!specialty_matches("Cardiology", "Dermatology"));
    }
}
