//! Core traits and types for the patient-reply orchestration crates.
//!
//! This crate provides the shared vocabulary used by every other crate in the
//! workspace. It defines:
//!
//! - [`IntentClassifier`] - The capability that turns free text into an intent + confidence
//! - [`MessageTransport`] - The outbound messaging channel (send + typing state)
//! - [`SchedulingEvent`] / [`InboundMessage`] - Boundary events, validated on entry
//! - [`FlowType`] / [`Intent`] - The canonical conversation vocabulary
//! - [`TimeWindows`] / [`ConfidenceThresholds`] - Explicit time and routing configuration
//! - [`ReplyTemplates`] - The texts sent back to patients
//!
//! # Example
//!
//! ```rust
//! use reply_core::{async_trait, ClassifierError, FlowType, Intent, IntentClassification, IntentClassifier};
//!
//! struct AlwaysConfirmed;
//!
//! #[async_trait]
//! impl IntentClassifier for AlwaysConfirmed {
//!     async fn classify(
//!         &self,
//!         _text: &str,
//!         _flow: Option<FlowType>,
//!     ) -> Result<IntentClassification, ClassifierError> {
//!         Ok(IntentClassification::new(Intent::Confirmed, 1.0))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "AlwaysConfirmed"
//!     }
//! }
//! ```

mod classifier;
mod clock;
mod config;
mod contact;
mod error;
mod event;
mod flow;
mod message;
mod templates;
mod transport;

pub use classifier::IntentClassifier;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfidenceThresholds, TimeWindows};
pub use contact::ContactId;
pub use error::{ClassifierError, CoreError, TransportError};
pub use event::{specialty_matches, AppointmentEvent, PatientIdentity, SchedulingEvent};
pub use flow::{ClassificationMethod, ConfidenceBand, FlowType, Intent, IntentClassification};
pub use message::{InboundMessage, OutboundPayload, ReplyButton, SystemMessage};
pub use templates::{render, ReplyTemplates};
pub use transport::{LoggingTransport, MessageTransport, NoOpTransport, SendReceipt, TypingState};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
