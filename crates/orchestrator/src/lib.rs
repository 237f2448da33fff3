//! Patient-reply orchestrator.
//!
//! This crate provides the [`Orchestrator`] type, which turns scheduling
//! events into outbound messages and patient replies into record updates.
//!
//! # Features
//!
//! - Sends confirmation requests and cancellation notices for new events
//! - Drops events the connector reports twice (SHA-256 fingerprints)
//! - Refuses to guess when several messages are waiting for a reply
//! - Routes classified replies on confidence (act, ask, or fall back)
//! - Moves records and operator badges forward, never back
//! - Links new appointments to earlier cancellations of the same patient
//! - Audits every pass
//!
//! # Architecture
//!
//! ```text
//! Scheduling event (connector)            Inbound reply (gateway)
//!          ↓                                        ↓
//! ┌──────────────────────┐        ┌──────────────────────────────────┐
//! │ INTAKE               │        │ PIPELINE (per-contact lock)      │
//! │  validate            │        │  1. ambiguity check              │
//! │  fingerprint         │        │  2. pending message?             │
//! │  link or request     │        │  3. classify (with timeout)      │
//! │  cancellation notice │        │  4. compatible with flow?        │
//! └──────────┬───────────┘        │  5. band: auto / ask / fallback  │
//!            │                    └────────────────┬─────────────────┘
//!            ↓                                     ↓
//!      RecordBook (status + badge)   ConversationStore (pending, counters)
//!            ↓                                     ↓
//!                        DispatchQueue (paced sends)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dispatch_queue::{DispatchConfig, DispatchQueue};
//! use keyword_classifier::KeywordClassifier;
//! use orchestrator::Orchestrator;
//! use reply_core::{InboundMessage, LoggingTransport, SchedulingEvent};
//!
//! let queue = DispatchQueue::new(DispatchConfig::from_env()?, Arc::new(LoggingTransport::default()));
//! let orchestrator = Orchestrator::new(Arc::new(KeywordClassifier::new()), queue);
//!
//! orchestrator.handle_event(event).await;
//! let outcome = orchestrator.process_inbound(message).await;
//! println!("{}", outcome.action.as_str());
//! ```

mod audit;
mod error;
mod intake;
mod linker;
mod orchestrator;
mod records;
mod transitions;

// Public exports
pub use audit::{
    AuditEntry, AuditKind, AuditLog, AuditMetrics, AuditSink, TracingAuditSink, DISPATCH_FAILED,
    DISPATCH_SENT,
};
pub use error::{OrchestratorError, Result};
pub use intake::IntakeOutcome;
pub use linker::{LinkOutcome, LinkStats};
pub use orchestrator::{
    Orchestrator, PipelineAction, PipelineOutcome, DEFAULT_CLASSIFIER_ATTEMPTS,
    DEFAULT_CLASSIFIER_TIMEOUT,
};
pub use records::{event_fingerprint, RecordBook, RecordEvent, TrackedRecord};
pub use transitions::{can_transition, Badge, BadgeColor, FollowUp, RecordStatus, TransitionOutcome};
