//! Delayed classifier implementation - wraps another classifier with artificial delay.

use std::time::Duration;

use async_trait::async_trait;
use reply_core::{ClassifierError, FlowType, IntentClassification, IntentClassifier};
use tokio::time::sleep;

/// A classifier that wraps another classifier and adds artificial delay.
///
/// Useful for testing timeout handling around classification calls.
pub struct DelayedClassifier<C: IntentClassifier> {
    inner: C,
    delay: Duration,
}

impl<C: IntentClassifier> DelayedClassifier<C> {
    pub fn new(inner: C, delay: Duration) -> Self {
        Self { inner, delay }
    }

    pub fn with_millis(inner: C, millis: u64) -> Self {
        Self::new(inner, Duration::from_millis(millis))
    }

    pub fn with_secs(inner: C, secs: u64) -> Self {
        Self::new(inner, Duration::from_secs(secs))
    }
}

#[async_trait]
impl<C: IntentClassifier> IntentClassifier for DelayedClassifier<C> {
    async fn classify(
        &self,
        text: &str,
        flow: Option<FlowType>,
    ) -> Result<IntentClassification, ClassifierError> {
        sleep(self.delay).await;
        self.inner.classify(text, flow).await
    }

    fn name(&self) -> &str {
        "DelayedClassifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedClassifier;
    use reply_core::Intent;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_delayed_classifier() {
        let classifier =
            DelayedClassifier::with_millis(FixedClassifier::new(Intent::Confirmed, 1.0), 100);

        let start = Instant::now();
        let c = classifier.classify("sim", None).await.unwrap();

        assert_eq!(c.intent, Intent::Confirmed);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(classifier.name(), "DelayedClassifier");
    }
}
