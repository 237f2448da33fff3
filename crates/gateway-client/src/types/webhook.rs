//! Webhook payloads posted by the gateway.

use chrono::{DateTime, TimeZone, Utc};
use reply_core::{ContactId, InboundMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Top-level webhook notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub contacts: Vec<WebhookContact>,
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
    /// Delivery and read statuses of our own messages.
    #[serde(default)]
    pub statuses: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookContact {
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<ContactProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactProfile {
    #[serde(default)]
    pub name: Option<String>,
}

/// One inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    pub id: String,
    /// Seconds since the epoch, as a string.
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextContent>,
    #[serde(default)]
    pub interactive: Option<InteractiveContent>,
    /// Template quick-reply buttons.
    #[serde(default)]
    pub button: Option<TemplateButton>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub button_reply: Option<ButtonReply>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonReply {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateButton {
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub text: String,
}

impl WebhookMessage {
    fn received_at(&self) -> Option<DateTime<Utc>> {
        let secs: i64 = self.timestamp.parse().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }

    /// Convert to a validated inbound message.
    ///
    /// Returns `None` for unsupported message types (media, reactions, ...)
    /// and for senders that do not normalize to a contact.
    pub fn to_inbound(&self, now: DateTime<Utc>) -> Option<InboundMessage> {
        let contact = match ContactId::parse(&self.from) {
            Ok(contact) => contact,
            Err(err) => {
                warn!("Ignoring message {} from unusable sender: {}", self.id, err);
                return None;
            }
        };
        let received_at = self.received_at().unwrap_or(now);

        let message = match self.kind.as_str() {
            "text" => {
                let body = self.text.as_ref()?.body.clone();
                InboundMessage::new(contact, body, received_at)
            }
            "interactive" => {
                let reply = self.interactive.as_ref()?.button_reply.as_ref()?;
                InboundMessage::new(contact, reply.title.clone(), received_at).with_button(&reply.id)
            }
            "button" => {
                let button = self.button.as_ref()?;
                let mut message = InboundMessage::new(contact, button.text.clone(), received_at);
                if let Some(payload) = &button.payload {
                    message = message.with_button(payload);
                }
                message
            }
            other => {
                debug!("Ignoring unsupported message type {} ({})", other, self.id);
                return None;
            }
        };

        let message = message.with_message_id(&self.id);
        message.validate().ok()?;
        Some(message)
    }
}

impl WebhookPayload {
    /// Every supported inbound message in the notification, in order.
    pub fn inbound_messages(&self, now: DateTime<Utc>) -> Vec<InboundMessage> {
        self.entry
            .iter()
            .flat_map(|entry| &entry.changes)
            .filter(|change| change.field == "messages")
            .flat_map(|change| &change.value.messages)
            .filter_map(|message| message.to_inbound(now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(messages: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "contacts": [{ "wa_id": "5511987654321", "profile": { "name": "Ana" } }],
                        "messages": messages
                    }
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_text_message() {
        let payload = payload(json!([{
            "from": "5511987654321",
            "id": "wamid.1",
            "timestamp": "1767261600",
            "type": "text",
            "text": { "body": "sim, confirmo" }
        }]));

        let messages = payload.inbound_messages(Utc::now());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].contact.as_str(), "5511987654321");
        assert_eq!(messages[0].text, "sim, confirmo");
        assert_eq!(messages[0].message_id.as_deref(), Some("wamid.1"));
        assert_eq!(messages[0].received_at.timestamp(), 1_767_261_600);
    }

    #[test]
    fn test_button_reply_uses_button_id() {
        let payload = payload(json!([{
            "from": "5511987654321",
            "id": "wamid.2",
            "timestamp": "1767261600",
            "type": "interactive",
            "interactive": {
                "type": "button_reply",
                "button_reply": { "id": "2", "title": "Não poderei ir" }
            }
        }]));

        let messages = payload.inbound_messages(Utc::now());
        assert_eq!(messages[0].classification_text(), "2");
        assert_eq!(messages[0].text, "Não poderei ir");
    }

    #[test]
    fn test_unsupported_and_empty_messages_skipped() {
        let payload = payload(json!([
            { "from": "5511987654321", "id": "wamid.3", "type": "image" },
            { "from": "5511987654321", "id": "wamid.4", "type": "text", "text": { "body": "   " } },
            { "from": "12", "id": "wamid.5", "type": "text", "text": { "body": "oi" } }
        ]));
        assert!(payload.inbound_messages(Utc::now()).is_empty());
    }

    #[test]
    fn test_status_only_notification() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [{ "id": "WABA", "changes": [{
                "field": "messages",
                "value": { "statuses": [{ "id": "wamid.9", "status": "delivered" }] }
            }]}]
        }))
        .unwrap();
        assert!(payload.inbound_messages(Utc::now()).is_empty());
    }
}
