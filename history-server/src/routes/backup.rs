use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use history_engine::RunReport;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub status: &'static str,
    pub report: RunReport,
}

/// POST /backup - run every tracked config now and wait for the result.
pub async fn trigger_backup(State(state): State<Arc<AppState>>) -> Json<TriggerResponse> {
    tracing::info!("Manual backup triggered");
    let report = state.orchestrator.trigger_all(&state.shutdown).await;
    Json(TriggerResponse {
        status: "backup process completed",
        report,
    })
}
