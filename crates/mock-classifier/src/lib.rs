//! Mock classifiers and transports for patient-reply processing tests.
//!
//! This crate provides mock implementations of the core traits:
//! - `FixedClassifier` - Always returns the same classification
//! - `ScriptedClassifier` - Returns queued classifications in order
//! - `FailingClassifier` - Always reports the classifier as unavailable
//! - `DelayedClassifier` - Wraps another classifier with artificial delay
//! - `RecordingTransport` - Records every send and typing change, with injectable failures
//!
//! For production classification, use the `keyword-classifier` crate instead.
//!
//! # Example
//!
//! ```rust
//! use mock_classifier::{FixedClassifier, Intent, IntentClassifier, FlowType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mock_classifier::ClassifierError> {
//!     let classifier = FixedClassifier::new(Intent::Confirmed, 0.95);
//!     let c = classifier.classify("1", Some(FlowType::Confirmation)).await?;
//!     assert_eq!(c.intent, Intent::Confirmed);
//!     Ok(())
//! }
//! ```

mod delayed;
mod scripted;
mod transport;

// Re-export reply-core types for convenience
pub use reply_core::{
    async_trait, ClassifierError, FlowType, Intent, IntentClassification, IntentClassifier,
    MessageTransport, TransportError,
};

pub use delayed::DelayedClassifier;
pub use scripted::{FailingClassifier, FixedClassifier, ScriptedClassifier};
pub use transport::{RecordingTransport, SentMessage};
