//! Scheduling connector endpoint.

use axum::extract::State;
use axum::Json;
use orchestrator::IntakeOutcome;
use reply_core::SchedulingEvent;

use crate::state::AppState;

/// Feed one scheduling event to intake.
///
/// Answers 200 with the outcome, failures included. Repeats are dropped by
/// fingerprint.
pub async fn ingest(
    State(state): State<AppState>,
    Json(event): Json<SchedulingEvent>,
) -> Json<IntakeOutcome> {
    Json(state.orchestrator.handle_event(event).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support;
    use serde_json::json;

    fn created(record_id: &str) -> SchedulingEvent {
        let now = chrono::Utc::now();
        serde_json::from_value(json!({
            "type": "appointment_created",
            "record_id": record_id,
            "patient": { "record_number": "778899", "patient_id": null },
            "patient_name": "Ana",
            "specialty": "Cardiology",
            "scheduled_at": now + chrono::Duration::days(3),
            "created_at": now,
            "cancelled_at": null,
            "phones": ["11987654321"]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_requests_confirmation_once() {
        let (state, _rx) = test_support::state();
        let event = created("R1");

        let Json(first) = ingest(State(state.clone()), Json(event.clone())).await;
        assert!(matches!(first, IntakeOutcome::ConfirmationRequested { .. }));

        let Json(second) = ingest(State(state), Json(event)).await;
        assert_eq!(second, IntakeOutcome::Duplicate);
    }
}
