//! The intent classification capability.

use async_trait::async_trait;

use crate::error::ClassifierError;
use crate::flow::{ConfidenceBand, FlowType, Intent, IntentClassification};
use crate::templates::ReplyTemplates;

/// Turns free text into an intent and a confidence score.
///
/// The orchestration core only consumes this capability; how an
/// implementation reaches its answer is its own business. This trait is
/// object-safe and can be used with `Arc<dyn IntentClassifier>`.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify `text`, optionally knowing which flow the reply answers.
    async fn classify(
        &self,
        text: &str,
        flow: Option<FlowType>,
    ) -> Result<IntentClassification, ClassifierError>;

    /// Get a human-readable name for this classifier implementation.
    fn name(&self) -> &str;

    /// Whether `intent` is a legitimate answer in `flow`.
    ///
    /// Default implementation uses the canonical compatibility sets.
    fn is_compatible(&self, intent: Intent, flow: FlowType) -> bool {
        intent.is_compatible_with(flow)
    }

    /// Clarification text for a reply that was not acted on.
    ///
    /// Medium confidence asks the patient to confirm the understood option;
    /// anything else lists the numbered options of the flow.
    fn clarification_message(
        &self,
        classification: &IntentClassification,
        flow: FlowType,
        band: ConfidenceBand,
        templates: &ReplyTemplates,
    ) -> String {
        match band {
            ConfidenceBand::Medium if classification.intent.is_compatible_with(flow) => {
                templates.confirm_prompt(classification.intent, flow)
            }
            _ => templates.generic_clarification(flow),
        }
    }
}
