//! Rate-limited outbound dispatch queue.
//!
//! Every outbound message goes through one FIFO queue drained by a single
//! consumer that paces sends so the channel does not look automated:
//!
//! ```text
//!   enqueue ──► [ item | item | item ] ──► consumer
//!                                            │
//!                       gap 45–120s (10–15 min after every 20 sends)
//!                                            │
//!                         typing 3–5s (taken out of the gap)
//!                                            │
//!                              send (bounded by timeout)
//!                               │                 │
//!                             sent         failed: back of the queue,
//!                                          given up after 3 attempts
//! ```
//!
//! Greeting variation is applied once, at enqueue time.

mod config;
mod error;
mod greeting;
mod item;
mod queue;

pub use config::DispatchConfig;
pub use error::QueueError;
pub use item::{DispatchOutcome, ItemStatus, QueueItem, QueueStatus, QueuedPreview};
pub use queue::DispatchQueue;
