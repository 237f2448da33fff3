//! Messaging gateway HTTP client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reply_core::{
    ContactId, MessageTransport, OutboundPayload, SendReceipt, TransportError, TypingState,
};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::types::{ApiErrorResponse, SendRequest, SendResponse, TypingRequest};

/// Client for the messaging gateway.
///
/// The gateway only shows a typing indicator in reply to a specific inbound
/// message, so the client remembers the last inbound message id per contact.
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    config: GatewayConfig,
    last_inbound: Arc<Mutex<HashMap<ContactId, String>>>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(GatewayError::Http)?;

        info!("Gateway client for {}", config.messages_url());
        Ok(Self {
            http,
            config,
            last_inbound: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Remember the latest inbound message id of a contact.
    pub fn remember_inbound(&self, contact: &ContactId, message_id: impl Into<String>) {
        self.last_inbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(contact.clone(), message_id.into());
    }

    fn last_inbound(&self, contact: &ContactId) -> Option<String> {
        self.last_inbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(contact)
            .cloned()
    }

    async fn post<T: Serialize>(&self, body: &T) -> Result<String, GatewayError> {
        let resp = self
            .http
            .post(self.config.messages_url())
            .bearer_auth(&self.config.access_token)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorResponse>(&text) {
                Ok(err) => GatewayError::Api {
                    code: err.error.code,
                    message: err.error.message,
                },
                Err(_) => GatewayError::Api {
                    code: i64::from(status.as_u16()),
                    message: text,
                },
            });
        }
        Ok(text)
    }

    /// Send a text or button message.
    pub async fn send_payload(
        &self,
        contact: &ContactId,
        payload: &OutboundPayload,
    ) -> Result<String, GatewayError> {
        let request = SendRequest::new(contact, payload);
        debug!("Sending to {} ({} buttons)", contact, payload.buttons.len());

        let body = self.post(&request).await?;
        let response: SendResponse = serde_json::from_str(&body)?;
        response
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| GatewayError::SendFailed("response carried no message id".to_string()))
    }

    /// Mark the contact's last message read and show the typing indicator.
    ///
    /// Does nothing when no inbound message is known for the contact.
    pub async fn send_typing(&self, contact: &ContactId) -> Result<(), GatewayError> {
        let Some(message_id) = self.last_inbound(contact) else {
            debug!("No inbound message to attach typing to for {}", contact);
            return Ok(());
        };
        self.post(&TypingRequest::new(message_id)).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for GatewayClient {
    async fn send(
        &self,
        contact: &ContactId,
        payload: &OutboundPayload,
    ) -> Result<SendReceipt, TransportError> {
        let message_id = self.send_payload(contact, payload).await?;
        Ok(SendReceipt { message_id })
    }

    async fn set_typing(&self, contact: &ContactId, state: TypingState) -> Result<(), TransportError> {
        match state {
            TypingState::Composing => {
                if let Err(e) = self.send_typing(contact).await {
                    // Typing failures are only logged.
                    warn!("Failed to set typing for {}: {}", contact, e);
                }
                Ok(())
            }
            // The indicator clears itself when the message arrives.
            TypingState::Paused => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "gateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn client() -> GatewayClient {
        GatewayClient::new(GatewayConfig::new("http://127.0.0.1:9", "123", "token")).unwrap()
    }

    #[test]
    fn test_remember_inbound_keeps_latest() {
        let client = client();
        let contact = ContactId::parse("11987654321").unwrap();
        assert!(client.last_inbound(&contact).is_none());

        client.remember_inbound(&contact, "wamid.1");
        client.remember_inbound(&contact, "wamid.2");
        assert_eq!(client.last_inbound(&contact).as_deref(), Some("wamid.2"));
    }

    #[tokio::test]
    async fn test_typing_without_inbound_is_noop() {
        let client = client();
        let contact = ContactId::parse("11987654321").unwrap();
        client
            .set_typing(&contact, TypingState::Composing)
            .await
            .unwrap();
        client.set_typing(&contact, TypingState::Paused).await.unwrap();
    }
}
