//! Messaging gateway client library.
//!
//! This crate provides a Rust client for a WhatsApp Cloud-style messaging
//! API over HTTP. It supports:
//!
//! - Sending text messages and messages with up to three reply buttons
//! - Showing the typing indicator on the last inbound message
//! - Parsing webhook notifications into validated inbound messages
//!
//! [`GatewayClient`] implements [`reply_core::MessageTransport`], so it plugs
//! straight into the dispatch queue.
//!
//! # Example
//!
//! ```no_run
//! use gateway_client::{GatewayClient, GatewayConfig};
//! use reply_core::{ContactId, OutboundPayload};
//!
//! # async fn example() -> Result<(), gateway_client::GatewayError> {
//! let client = GatewayClient::new(GatewayConfig::from_env()?)?;
//! let contact = ContactId::parse("11987654321").unwrap();
//!
//! let id = client
//!     .send_payload(&contact, &OutboundPayload::text("Olá!"))
//!     .await?;
//! println!("Sent {}", id);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::GatewayClient;
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use types::*;
