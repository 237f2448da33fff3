//! Inbound and outbound message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::ContactId;
use crate::error::CoreError;
use crate::flow::FlowType;

/// A quick-reply button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    /// Identifier echoed back when the patient taps the button.
    pub id: String,
    pub title: String,
}

impl ReplyButton {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Content handed to the messaging transport.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<ReplyButton>,
}

impl OutboundPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<ReplyButton>) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn has_buttons(&self) -> bool {
        !self.buttons.is_empty()
    }
}

/// A system-initiated message that is waiting for the patient's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub id: String,
    pub flow: FlowType,
    pub record_id: String,
    /// Short human description of the item, used when listing pending items.
    pub summary: String,
    /// What was sent, kept so the message can be repeated verbatim.
    pub content: OutboundPayload,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub responded: bool,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
}

impl SystemMessage {
    pub fn new(
        id: impl Into<String>,
        flow: FlowType,
        record_id: impl Into<String>,
        summary: impl Into<String>,
        content: OutboundPayload,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            flow,
            record_id: record_id.into(),
            summary: summary.into(),
            content,
            sent_at,
            responded: false,
            responded_at: None,
        }
    }
}

/// A reply received from a patient, validated at the channel boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub contact: ContactId,
    pub text: String,
    /// Channel message id, when the channel provides one.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Id of the quick-reply button tapped, if the reply came from one.
    #[serde(default)]
    pub button_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(contact: ContactId, text: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            contact,
            text: text.into(),
            message_id: None,
            button_id: None,
            received_at,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_button(mut self, id: impl Into<String>) -> Self {
        self.button_id = Some(id.into());
        self
    }

    /// Text to classify: the button id for button replies, the body otherwise.
    pub fn classification_text(&self) -> &str {
        self.button_id.as_deref().unwrap_or(&self.text)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.text.trim().is_empty() && self.button_id.is_none() {
            return Err(CoreError::InvalidEvent(format!(
                "empty inbound message from {}",
                self.contact
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> ContactId {
        ContactId::parse("5511987654321").unwrap()
    }

    #[test]
    fn test_classification_text_prefers_button() {
        let msg = InboundMessage::new(contact(), "Confirmo", Utc::now()).with_button("1");
        assert_eq!(msg.classification_text(), "1");

        let msg = InboundMessage::new(contact(), "sim", Utc::now());
        assert_eq!(msg.classification_text(), "sim");
    }

    #[test]
    fn test_empty_inbound_rejected() {
        let msg = InboundMessage::new(contact(), "   ", Utc::now());
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_payload_skips_empty_buttons() {
        let json = serde_json::to_value(OutboundPayload::text("hi")).unwrap();
        assert!(json.get("buttons").is_none());
    }
}
