//! Messaging gateway webhook.

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use gateway_client::WebhookPayload;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Subscription handshake parameters.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Answer the gateway's subscription handshake with the challenge.
pub async fn verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<String> {
    let gateway = state.gateway.as_ref().ok_or(ApiError::Forbidden)?;
    let (Some(mode), Some(token), Some(challenge)) =
        (params.mode, params.verify_token, params.challenge)
    else {
        return Err(ApiError::BadRequest("missing hub parameters".to_string()));
    };

    gateway
        .config()
        .verify_subscription(&mode, &token, &challenge)
        .ok_or(ApiError::Forbidden)
}

/// Accept a webhook delivery and hand its replies to the processor.
pub async fn receive(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<Value>> {
    let messages = payload.inbound_messages(Utc::now());
    debug!("Webhook delivery with {} usable messages", messages.len());

    let mut accepted = 0;
    for message in messages {
        if let (Some(gateway), Some(id)) = (&state.gateway, &message.message_id) {
            gateway.remember_inbound(&message.contact, id.clone());
        }
        state
            .inbound
            .send(message)
            .await
            .map_err(|_| ApiError::Unavailable("inbound processor stopped".to_string()))?;
        accepted += 1;
    }

    if accepted > 0 {
        info!("Accepted {} inbound messages", accepted);
    }
    Ok(Json(json!({ "accepted": accepted })))
}
