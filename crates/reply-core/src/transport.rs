//! Messaging transport trait and simple implementations.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contact::ContactId;
use crate::error::TransportError;
use crate::message::OutboundPayload;

/// Composing indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingState {
    Composing,
    Paused,
}

/// Acknowledgement returned by the channel for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
}

/// Trait for sending messages and typing indicators.
///
/// Abstracted to support different channels (HTTP gateway, tests, etc.)
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Send a message, with optional quick-reply buttons.
    async fn send(
        &self,
        contact: &ContactId,
        payload: &OutboundPayload,
    ) -> Result<SendReceipt, TransportError>;

    /// Set the composing indicator for a contact.
    async fn set_typing(&self, contact: &ContactId, state: TypingState)
        -> Result<(), TransportError>;

    /// Get a human-readable name for this transport.
    fn name(&self) -> &str {
        "transport"
    }
}

/// A no-op transport that discards all messages.
#[derive(Debug, Default)]
pub struct NoOpTransport {
    counter: AtomicU64,
}

#[async_trait]
impl MessageTransport for NoOpTransport {
    async fn send(
        &self,
        _contact: &ContactId,
        _payload: &OutboundPayload,
    ) -> Result<SendReceipt, TransportError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(SendReceipt {
            message_id: format!("noop-{n}"),
        })
    }

    async fn set_typing(&self, _contact: &ContactId, _state: TypingState) -> Result<(), TransportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// A transport for dry runs that logs every operation.
#[derive(Debug, Default)]
pub struct LoggingTransport {
    counter: AtomicU64,
}

#[async_trait]
impl MessageTransport for LoggingTransport {
    async fn send(
        &self,
        contact: &ContactId,
        payload: &OutboundPayload,
    ) -> Result<SendReceipt, TransportError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "[dry-run] Sending to {} ({} buttons): {}",
            contact,
            payload.buttons.len(),
            payload.text
        );
        Ok(SendReceipt {
            message_id: format!("dry-run-{n}"),
        })
    }

    async fn set_typing(&self, contact: &ContactId, state: TypingState) -> Result<(), TransportError> {
        tracing::info!("[dry-run] Typing {:?} for {}", state, contact);
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}
