//! Per-contact conversation state.
//!
//! Tracks, for every contact, the system messages still waiting for a reply,
//! the failed-reply counter, reschedule requests and anti-loop markers. Each
//! contact has its own lock: callers either use the one-shot operations on
//! [`ConversationStore`] or open a [`ContactSession`] to run several steps
//! atomically.
//!
//! # Example
//!
//! ```no_run
//! use conversation_store::ConversationStore;
//! use reply_core::ContactId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ConversationStore::default();
//! let contact = ContactId::parse("11987654321")?;
//!
//! let mut session = store.session(&contact).await;
//! let now = session.now();
//! let attempts = session.increment_failed_attempts(now);
//! session.commit().await;
//! assert_eq!(attempts, 1);
//! # Ok(())
//! # }
//! ```

mod context;
mod error;
mod store;

pub use context::{
    AmbiguityCheck, ConversationContext, InboundSummary, RequestStatus, RescheduleMarker,
    RescheduleRequest,
};
pub use error::{Result, StoreError};
pub use store::{ContactSession, ConversationStore, StoreStats};
