use crate::error::AppError;
use crate::services::backup_scheduler::BackupScheduler;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use history_engine::{AppSettings, EngineError};
use serde::Serialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_settings).put(update_settings))
}

#[derive(Debug, Serialize)]
pub struct UpdateSettingsResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateSettingsResponse {
    fn failed(status: StatusCode, error: String) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                warnings: Vec::new(),
                error: Some(error),
            }),
        )
    }
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<AppSettings> {
    Json(state.orchestrator.settings().as_ref().clone())
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AppSettings>, JsonRejection>,
) -> (StatusCode, Json<UpdateSettingsResponse>) {
    let settings = match body {
        Ok(Json(settings)) => settings,
        Err(e) => {
            return UpdateSettingsResponse::failed(
                StatusCode::BAD_REQUEST,
                format!("Invalid settings format: {}", e.body_text()),
            )
        }
    };

    if let Some(schedule) = settings.schedule() {
        if let Err(e) = BackupScheduler::validate(schedule) {
            return UpdateSettingsResponse::failed(
                StatusCode::BAD_REQUEST,
                format!("Invalid cron schedule: {e}"),
            );
        }
    }

    let update = match state.orchestrator.apply_settings(settings).await {
        Ok(update) => update,
        Err(EngineError::Validation(message)) => {
            return UpdateSettingsResponse::failed(
                StatusCode::BAD_REQUEST,
                format!("Invalid config groups: {message}"),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to save settings");
            let message = format!("Failed to save settings: {e}");
            return UpdateSettingsResponse::failed(AppError::from(e).status(), message);
        }
    };

    if let Some(watcher) = &state.watcher {
        watcher.refresh(&update.settings);
    }

    let mut warnings = update.warnings;
    if update.schedule_changed {
        if let Err(e) = state.scheduler.reschedule(update.settings.schedule()).await {
            tracing::error!(error = %e, "Failed to re-arm backup schedule");
            warnings.push(format!("Failed to apply cron schedule: {e}"));
        }
    }

    (
        StatusCode::OK,
        Json(UpdateSettingsResponse {
            success: true,
            warnings,
            error: None,
        }),
    )
}
