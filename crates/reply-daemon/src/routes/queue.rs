//! Dispatch queue and statistics endpoints.

use axum::extract::{Path, State};
use axum::Json;
use conversation_store::StoreStats;
use dispatch_queue::QueueStatus;
use orchestrator::{AuditMetrics, LinkStats};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{ApiError, Result};
use crate::state::AppState;

pub async fn status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.orchestrator.queue().status())
}

/// Drop a waiting item before it is sent.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    if state.orchestrator.queue().remove(&id) {
        Ok(Json(json!({ "removed": id })))
    } else {
        Err(ApiError::NotFound(format!("queue item {id}")))
    }
}

#[derive(Debug, Serialize)]
pub struct DaemonStats {
    pub conversations: StoreStats,
    pub links: LinkStats,
    pub audit: AuditMetrics,
    pub queue: QueueStatus,
}

pub async fn stats(State(state): State<AppState>) -> Json<DaemonStats> {
    let orchestrator = &state.orchestrator;
    Json(DaemonStats {
        conversations: orchestrator.store().stats().await,
        links: orchestrator.link_stats(),
        audit: orchestrator.audit().metrics().await,
        queue: orchestrator.queue().status(),
    })
}
