//! Conversation flows, intents and classification results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The kind of system-initiated conversation a reply belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    /// "Will you attend your appointment?"
    Confirmation,
    /// "Your appointment was cancelled, do you want to reschedule?"
    Cancellation,
}

impl FlowType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmation => "confirmation",
            Self::Cancellation => "cancellation",
        }
    }

    /// Intents a reply in this flow may legitimately carry, in option order.
    pub fn intents(self) -> &'static [Intent; 3] {
        match self {
            Self::Confirmation => &[Intent::Confirmed, Intent::Declined, Intent::NotScheduled],
            Self::Cancellation => &[
                Intent::WantsReschedule,
                Intent::PatientInitiatedCancel,
                Intent::NoRescheduleWanted,
            ],
        }
    }

    /// Map a numbered option (1-based) to its intent.
    pub fn option(self, number: u8) -> Option<Intent> {
        let index = usize::from(number).checked_sub(1)?;
        self.intents().get(index).copied()
    }

    /// Option number (1-based) for an intent of this flow.
    pub fn option_number(self, intent: Intent) -> Option<u8> {
        self.intents()
            .iter()
            .position(|candidate| *candidate == intent)
            .and_then(|index| u8::try_from(index + 1).ok())
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmation" => Ok(Self::Confirmation),
            "cancellation" => Ok(Self::Cancellation),
            other => Err(CoreError::InvalidEvent(format!("unknown flow: {other}"))),
        }
    }
}

/// Canonical intent vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Confirmed,
    Declined,
    NotScheduled,
    WantsReschedule,
    PatientInitiatedCancel,
    NoRescheduleWanted,
    /// The patient asked to talk to a person.
    HumanAgent,
    /// Conversational text with no actionable content.
    FreeTalk,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 9] = [
        Intent::Confirmed,
        Intent::Declined,
        Intent::NotScheduled,
        Intent::WantsReschedule,
        Intent::PatientInitiatedCancel,
        Intent::NoRescheduleWanted,
        Intent::HumanAgent,
        Intent::FreeTalk,
        Intent::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Declined => "declined",
            Self::NotScheduled => "not_scheduled",
            Self::WantsReschedule => "wants_reschedule",
            Self::PatientInitiatedCancel => "patient_initiated_cancel",
            Self::NoRescheduleWanted => "no_reschedule_wanted",
            Self::HumanAgent => "human_agent",
            Self::FreeTalk => "free_talk",
            Self::Unknown => "unknown",
        }
    }

    /// The flow this intent answers, if any.
    pub fn flow(self) -> Option<FlowType> {
        match self {
            Self::Confirmed | Self::Declined | Self::NotScheduled => Some(FlowType::Confirmation),
            Self::WantsReschedule | Self::PatientInitiatedCancel | Self::NoRescheduleWanted => {
                Some(FlowType::Cancellation)
            }
            Self::HumanAgent | Self::FreeTalk | Self::Unknown => None,
        }
    }

    pub fn is_compatible_with(self, flow: FlowType) -> bool {
        self.flow() == Some(flow)
    }

    /// Whether the intent carries no signal about any flow.
    pub fn is_unclassified(self) -> bool {
        matches!(self, Self::FreeTalk | Self::Unknown)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|intent| intent.as_str() == s)
            .ok_or_else(|| CoreError::InvalidEvent(format!("unknown intent: {s}")))
    }
}

/// How a classification was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    DirectNumber,
    Keyword,
    KeywordLowConfidence,
    Pattern,
    Fallback,
    /// Produced by a classifier that does not report its method.
    External,
}

impl ClassificationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectNumber => "direct_number",
            Self::Keyword => "keyword",
            Self::KeywordLowConfidence => "keyword_low_confidence",
            Self::Pattern => "pattern",
            Self::Fallback => "fallback",
            Self::External => "external",
        }
    }
}

/// Confidence band a classification falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Result of classifying one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub method: ClassificationMethod,
    /// Text as the classifier saw it after normalization.
    #[serde(default)]
    pub normalized_text: String,
}

impl IntentClassification {
    pub fn new(intent: Intent, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            intent,
            confidence,
            method: ClassificationMethod::External,
            normalized_text: String::new(),
        }
    }

    pub fn with_method(mut self, method: ClassificationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_normalized_text(mut self, text: impl Into<String>) -> Self {
        self.normalized_text = text.into();
        self
    }

    /// Classification used when nothing could be determined.
    pub fn unknown() -> Self {
        Self::new(Intent::Unknown, 0.0).with_method(ClassificationMethod::Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_options() {
        assert_eq!(FlowType::Confirmation.option(1), Some(Intent::Confirmed));
        assert_eq!(FlowType::Confirmation.option(3), Some(Intent::NotScheduled));
        assert_eq!(FlowType::Cancellation.option(1), Some(Intent::WantsReschedule));
        assert_eq!(FlowType::Cancellation.option(0), None);
        assert_eq!(FlowType::Cancellation.option(4), None);
        assert_eq!(
            FlowType::Cancellation.option_number(Intent::NoRescheduleWanted),
            Some(3)
        );
        assert_eq!(FlowType::Confirmation.option_number(Intent::WantsReschedule), None);
    }

    #[test]
    fn test_compatibility_sets_are_exact() {
        for intent in Intent::ALL {
            let in_confirmation = FlowType::Confirmation.intents().contains(&intent);
            let in_cancellation = FlowType::Cancellation.intents().contains(&intent);
            assert_eq!(intent.is_compatible_with(FlowType::Confirmation), in_confirmation);
            assert_eq!(intent.is_compatible_with(FlowType::Cancellation), in_cancellation);
        }
        assert!(!Intent::HumanAgent.is_compatible_with(FlowType::Confirmation));
    }

    #[test]
    fn test_intent_round_trips_through_str() {
        for intent in Intent::ALL {
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
        }
        assert!("maybe".parse::<Intent>().is_err());
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(IntentClassification::new(Intent::Confirmed, 1.7).confidence, 1.0);
        assert_eq!(IntentClassification::new(Intent::Confirmed, -0.2).confidence, 0.0);
        assert_eq!(IntentClassification::new(Intent::Confirmed, f64::NAN).confidence, 0.0);
    }
}
