//! Configuration types for gateway-client.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_BASE_URL` | `https://graph.facebook.com` | Base URL of the messaging API |
//! | `GATEWAY_API_VERSION` | `v21.0` | API version path segment |
//! | `GATEWAY_PHONE_NUMBER_ID` | (required) | Sender phone number id |
//! | `GATEWAY_ACCESS_TOKEN` | (required) | Bearer token |
//! | `GATEWAY_VERIFY_TOKEN` | (none) | Token expected on webhook verification |
//! | `GATEWAY_TIMEOUT_SECS` | 30 | HTTP request timeout |

use std::time::Duration;

use crate::error::GatewayError;

/// Configuration for talking to the messaging gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the gateway (e.g., "https://graph.facebook.com").
    pub base_url: String,
    pub api_version: String,
    /// Phone number id messages are sent from.
    pub phone_number_id: String,
    pub access_token: String,
    /// Token the gateway echoes when verifying the webhook subscription.
    pub verify_token: Option<String>,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(
        base_url: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_version: "v21.0".to_string(),
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
            verify_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, GatewayError> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| GatewayError::Config(format!("{key} not set")))
        };

        let mut config = Self::new(
            std::env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com".to_string()),
            required("GATEWAY_PHONE_NUMBER_ID")?,
            required("GATEWAY_ACCESS_TOKEN")?,
        );
        if let Ok(version) = std::env::var("GATEWAY_API_VERSION") {
            config.api_version = version;
        }
        config.verify_token = std::env::var("GATEWAY_VERIFY_TOKEN").ok();
        if let Ok(secs) = std::env::var("GATEWAY_TIMEOUT_SECS") {
            let secs = secs
                .trim()
                .parse()
                .map_err(|_| GatewayError::Config(format!("invalid GATEWAY_TIMEOUT_SECS: {secs}")))?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_verify_token(mut self, token: impl Into<String>) -> Self {
        self.verify_token = Some(token.into());
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Get the messages endpoint URL.
    pub fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url.trim_end_matches('/'),
            self.api_version,
            self.phone_number_id
        )
    }

    /// Answer a webhook verification request.
    ///
    /// Returns the challenge to echo back when the mode and token are right.
    pub fn verify_subscription(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        match &self.verify_token {
            Some(expected) if mode == "subscribe" && token == expected => Some(challenge.to_string()),
            _ => None,
        }
    }
}
