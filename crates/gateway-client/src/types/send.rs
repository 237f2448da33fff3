//! Request and response bodies for the messages endpoint.

use reply_core::{ContactId, OutboundPayload, ReplyButton};
use serde::{Deserialize, Serialize};

/// Maximum length of a reply-button title accepted by the gateway.
pub const BUTTON_TITLE_MAX_CHARS: usize = 20;
/// The gateway accepts at most this many reply buttons.
pub const MAX_BUTTONS: usize = 3;

/// Body of a send request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendRequest {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(flatten)]
    pub content: MessageContent,
}

/// Text or interactive content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextBody },
    Interactive { interactive: Interactive },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interactive {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub body: InteractiveBody,
    pub action: InteractiveAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractiveBody {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractiveAction {
    pub buttons: Vec<ButtonParam>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ButtonParam {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub reply: ButtonReplyParam,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ButtonReplyParam {
    pub id: String,
    pub title: String,
}

/// Cut a title to the gateway limit on a character boundary.
pub fn truncate_title(title: &str) -> String {
    title.chars().take(BUTTON_TITLE_MAX_CHARS).collect()
}

impl From<&ReplyButton> for ButtonParam {
    fn from(button: &ReplyButton) -> Self {
        Self {
            kind: "reply",
            reply: ButtonReplyParam {
                id: button.id.clone(),
                title: truncate_title(&button.title),
            },
        }
    }
}

impl SendRequest {
    /// Build the request for a payload: interactive when it has buttons.
    pub fn new(contact: &ContactId, payload: &OutboundPayload) -> Self {
        let content = if payload.has_buttons() {
            MessageContent::Interactive {
                interactive: Interactive {
                    kind: "button",
                    body: InteractiveBody {
                        text: payload.text.clone(),
                    },
                    action: InteractiveAction {
                        buttons: payload
                            .buttons
                            .iter()
                            .take(MAX_BUTTONS)
                            .map(ButtonParam::from)
                            .collect(),
                    },
                },
            }
        } else {
            MessageContent::Text {
                text: TextBody {
                    body: payload.text.clone(),
                },
            }
        };

        Self {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: contact.to_string(),
            content,
        }
    }
}

/// Body that marks an inbound message read and shows the typing indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypingRequest {
    pub messaging_product: &'static str,
    pub status: &'static str,
    pub message_id: String,
    pub typing_indicator: TypingIndicator,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypingIndicator {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl TypingRequest {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            messaging_product: "whatsapp",
            status: "read",
            message_id: message_id.into(),
            typing_indicator: TypingIndicator { kind: "text" },
        }
    }
}

/// Successful send response.
#[derive(Debug, Clone, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub messages: Vec<SentMessageId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessageId {
    pub id: String,
}

/// Error envelope returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contact() -> ContactId {
        ContactId::parse("11987654321").unwrap()
    }

    #[test]
    fn test_text_request_shape() {
        let request = SendRequest::new(&contact(), &OutboundPayload::text("Olá"));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "5511987654321",
                "type": "text",
                "text": { "body": "Olá" }
            })
        );
    }

    #[test]
    fn test_interactive_request_truncates_titles() {
        let payload = OutboundPayload::text("Confirma?").with_buttons(vec![
            ReplyButton::new("1", "Confirmo presença na consulta"),
            ReplyButton::new("2", "Não poderei ir"),
        ]);
        let value = serde_json::to_value(SendRequest::new(&contact(), &payload)).unwrap();

        assert_eq!(value["type"], "interactive");
        assert_eq!(value["interactive"]["type"], "button");
        let buttons = value["interactive"]["action"]["buttons"].as_array().unwrap();
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0]["reply"]["id"], "1");
        assert_eq!(
            buttons[0]["reply"]["title"].as_str().unwrap().chars().count(),
            BUTTON_TITLE_MAX_CHARS
        );
        assert_eq!(buttons[1]["reply"]["title"], "Não poderei ir");
    }

    #[test]
    fn test_truncate_title_keeps_accents_whole() {
        let title = truncate_title("Não é necessário reagendar");
        assert_eq!(title.chars().count(), 20);
        assert!(title.starts_with("Não é"));
    }
}
