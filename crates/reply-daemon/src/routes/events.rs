//! Server-sent stream of record changes for operator dashboards.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use orchestrator::RecordEvent;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::state::AppState;

fn event_name(event: &RecordEvent) -> &'static str {
    match event {
        RecordEvent::Created { .. } => "created",
        RecordEvent::StatusChanged { .. } => "status_changed",
        RecordEvent::BadgeChanged { .. } => "badge_changed",
    }
}

pub async fn record_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.orchestrator.records().subscribe()).filter_map(
        |received| match received {
            Ok(event) => Event::default()
                .event(event_name(&event))
                .json_data(&event)
                .ok()
                .map(Ok),
            Err(lagged) => {
                // Slow subscribers miss events; dashboards reload on reconnect.
                warn!("Record event subscriber {}", lagged);
                None
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}
