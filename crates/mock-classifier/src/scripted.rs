//! Classifiers with predetermined answers.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use reply_core::{ClassifierError, FlowType, Intent, IntentClassification, IntentClassifier};

/// A classifier that always returns the same answer.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    classification: IntentClassification,
}

impl FixedClassifier {
    pub fn new(intent: Intent, confidence: f64) -> Self {
        Self {
            classification: IntentClassification::new(intent, confidence),
        }
    }
}

#[async_trait]
impl IntentClassifier for FixedClassifier {
    async fn classify(
        &self,
        text: &str,
        _flow: Option<FlowType>,
    ) -> Result<IntentClassification, ClassifierError> {
        Ok(self
            .classification
            .clone()
            .with_normalized_text(text.trim().to_lowercase()))
    }

    fn name(&self) -> &str {
        "FixedClassifier"
    }
}

/// A classifier that answers from a queue, then falls back to free talk.
///
/// Every call is recorded so tests can assert what was (or was not) classified.
/// A `None` entry makes that call fail as unavailable.
#[derive(Debug, Default)]
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Option<IntentClassification>>>,
    calls: Mutex<Vec<(String, Option<FlowType>)>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next answer.
    pub fn push(&self, intent: Intent, confidence: f64) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Some(IntentClassification::new(intent, confidence)));
        self
    }

    /// Queue an outage for the next call.
    pub fn push_failure(&self) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(None);
        self
    }

    /// Texts and flows this classifier has been asked about.
    pub fn calls(&self) -> Vec<(String, Option<FlowType>)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl IntentClassifier for ScriptedClassifier {
    async fn classify(
        &self,
        text: &str,
        flow: Option<FlowType>,
    ) -> Result<IntentClassification, ClassifierError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((text.to_string(), flow));

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Some(IntentClassification::new(Intent::FreeTalk, 0.3)));
        match next {
            Some(classification) => {
                Ok(classification.with_normalized_text(text.trim().to_lowercase()))
            }
            None => Err(ClassifierError::Unavailable("scripted outage".to_string())),
        }
    }

    fn name(&self) -> &str {
        "ScriptedClassifier"
    }
}

/// A classifier that is never available.
#[derive(Debug, Clone, Default)]
pub struct FailingClassifier;

#[async_trait]
impl IntentClassifier for FailingClassifier {
    async fn classify(
        &self,
        _text: &str,
        _flow: Option<FlowType>,
    ) -> Result<IntentClassification, ClassifierError> {
        Err(ClassifierError::Unavailable("mock outage".to_string()))
    }

    fn name(&self) -> &str {
        "FailingClassifier"
    }
}
