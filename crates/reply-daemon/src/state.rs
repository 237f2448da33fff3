//! Application state shared across handlers.

use std::sync::Arc;

use gateway_client::GatewayClient;
use orchestrator::Orchestrator;
use reply_core::InboundMessage;
use tokio::sync::mpsc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Hands inbound messages to the processor.
    pub inbound: mpsc::Sender<InboundMessage>,
    /// `None` in dry-run mode.
    pub gateway: Option<GatewayClient>,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        inbound: mpsc::Sender<InboundMessage>,
        gateway: Option<GatewayClient>,
    ) -> Self {
        Self {
            orchestrator,
            inbound,
            gateway,
        }
    }
}
