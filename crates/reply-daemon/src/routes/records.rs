//! Operator endpoints for tracked records.

use axum::extract::{Path, Query, State};
use axum::Json;
use orchestrator::{Badge, TrackedRecord};
use reply_core::FlowType;
use serde::Deserialize;

use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub badge: Option<Badge>,
    pub flow: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub badge: Badge,
}

fn parse_flow(raw: &str) -> Result<FlowType> {
    raw.parse()
        .map_err(|e: reply_core::CoreError| ApiError::BadRequest(e.to_string()))
}

/// List tracked records, optionally by badge and flow.
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TrackedRecord>>> {
    let flow = params.flow.as_deref().map(parse_flow).transpose()?;
    let records = match params.badge {
        Some(badge) => state.orchestrator.records().list_by_badge(badge).await,
        None => state.orchestrator.records().list().await,
    };

    Ok(Json(
        records
            .into_iter()
            .filter(|r| flow.map_or(true, |f| r.flow == f))
            .collect(),
    ))
}

pub async fn get_record(
    State(state): State<AppState>,
    Path((flow, record_id)): Path<(String, String)>,
) -> Result<Json<TrackedRecord>> {
    let flow = parse_flow(&flow)?;
    Ok(Json(state.orchestrator.records().get(flow, &record_id).await?))
}

/// Operator override: resolve a pending-action badge.
pub async fn resolve(
    State(state): State<AppState>,
    Path((flow, record_id)): Path<(String, String)>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<TrackedRecord>> {
    let flow = parse_flow(&flow)?;
    let record = state
        .orchestrator
        .resolve_badge(flow, &record_id, request.badge)
        .await?;
    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support;

    #[tokio::test]
    async fn test_unknown_flow_is_bad_request() {
        let (state, _rx) = test_support::state();
        let err = get_record(
            State(state),
            Path(("billing".to_string(), "R1".to_string())),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_resolve_missing_record() {
        let (state, _rx) = test_support::state();
        let err = resolve(
            State(state),
            Path(("cancellation".to_string(), "R9".to_string())),
            Json(ResolveRequest {
                badge: Badge::Rescheduled,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Orchestrator(orchestrator::OrchestratorError::RecordNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_empty() {
        let (state, _rx) = test_support::state();
        let Json(records) = list(State(state), Query(ListParams::default()))
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}
