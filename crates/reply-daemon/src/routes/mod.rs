//! Route definitions.

mod appointments;
mod events;
mod health;
mod queue;
mod records;
mod webhook;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Create the application router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        // Messaging gateway
        .route("/webhook", get(webhook::verify).post(webhook::receive))
        // Scheduling connector
        .route("/api/appointments", post(appointments::ingest))
        // Operator API
        .route("/api/records", get(records::list))
        .route("/api/records/:flow/:record_id", get(records::get_record))
        .route(
            "/api/records/:flow/:record_id/resolve",
            post(records::resolve),
        )
        .route("/api/events", get(events::record_events))
        .route("/api/queue", get(queue::status))
        .route("/api/queue/:id", delete(queue::remove))
        .route("/api/stats", get(queue::stats))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use dispatch_queue::{DispatchConfig, DispatchQueue};
    use keyword_classifier::KeywordClassifier;
    use mock_classifier::RecordingTransport;
    use orchestrator::Orchestrator;
    use reply_core::InboundMessage;
    use tokio::sync::mpsc;

    use crate::state::AppState;

    pub fn state() -> (AppState, mpsc::Receiver<InboundMessage>) {
        let queue = DispatchQueue::new(
            DispatchConfig::immediate(),
            Arc::new(RecordingTransport::new()),
        );
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(KeywordClassifier::new()), queue));
        let (tx, rx) = mpsc::channel(16);
        (AppState::new(orchestrator, tx, None), rx)
    }
}
