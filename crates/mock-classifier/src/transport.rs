//! Recording transport with injectable failures.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reply_core::{ContactId, MessageTransport, OutboundPayload, SendReceipt, TransportError, TypingState};
use tokio::sync::Notify;
use tokio::time::Instant;

/// One message handed to the transport.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub contact: ContactId,
    pub payload: OutboundPayload,
    pub message_id: String,
    /// Tokio time of the send, so paused-clock tests can measure gaps.
    pub at: Instant,
}

/// A transport that keeps everything it is asked to do.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    typing: Mutex<Vec<(ContactId, TypingState, Instant)>>,
    failed_attempts: AtomicUsize,
    fail_next: AtomicUsize,
    failing_contacts: Mutex<HashSet<ContactId>>,
    notify: Notify,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` sends fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make every send to `contact` fail.
    pub fn fail_contact(&self, contact: &ContactId) {
        self.failing_contacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(contact.clone());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_to(&self, contact: &ContactId) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|m| &m.contact == contact)
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn failed_attempts(&self) -> usize {
        self.failed_attempts.load(Ordering::SeqCst)
    }

    pub fn typing_events(&self) -> Vec<(ContactId, TypingState, Instant)> {
        self.typing.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wait until at least `count` sends (successful or failed) were attempted.
    pub async fn wait_for_attempts(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.sent_count() + self.failed_attempts() >= count {
                return;
            }
            notified.await;
        }
    }

    fn should_fail(&self, contact: &ContactId) -> bool {
        if self
            .failing_contacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(contact)
        {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send(
        &self,
        contact: &ContactId,
        payload: &OutboundPayload,
    ) -> Result<SendReceipt, TransportError> {
        if self.should_fail(contact) {
            self.failed_attempts.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_waiters();
            return Err(TransportError::Unavailable("injected failure".to_string()));
        }

        let message_id = {
            let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
            let message_id = format!("wamid.{}", sent.len() + 1);
            sent.push(SentMessage {
                contact: contact.clone(),
                payload: payload.clone(),
                message_id: message_id.clone(),
                at: Instant::now(),
            });
            message_id
        };
        self.notify.notify_waiters();

        Ok(SendReceipt { message_id })
    }

    async fn set_typing(&self, contact: &ContactId, state: TypingState) -> Result<(), TransportError> {
        self.typing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((contact.clone(), state, Instant::now()));
        Ok(())
    }

    fn name(&self) -> &str {
        "RecordingTransport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(n: &str) -> ContactId {
        ContactId::parse(n).unwrap()
    }

    #[tokio::test]
    async fn test_records_sends() {
        let transport = RecordingTransport::new();
        let a = contact("5511900000001");

        transport.send(&a, &OutboundPayload::text("oi")).await.unwrap();
        transport.set_typing(&a, TypingState::Composing).await.unwrap();

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.sent_to(&a)[0].payload.text, "oi");
        assert_eq!(transport.typing_events().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let transport = RecordingTransport::new();
        let a = contact("5511900000001");
        let b = contact("5511900000002");

        transport.fail_next(1);
        assert!(transport.send(&a, &OutboundPayload::text("1")).await.is_err());
        assert!(transport.send(&a, &OutboundPayload::text("2")).await.is_ok());

        transport.fail_contact(&b);
        assert!(transport.send(&b, &OutboundPayload::text("3")).await.is_err());
        assert_eq!(transport.failed_attempts(), 2);
        transport.wait_for_attempts(3).await;
    }
}
