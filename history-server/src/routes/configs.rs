use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use history_engine::diff::BackupDiffResponse;
use history_engine::store::BackupInfo;
use history_engine::ConfigMetadata;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_configs))
        .route("/{path}/{id}", delete(delete_all_backups))
        .route("/{path}/{id}/backups", get(list_backups))
        .route("/{path}/{id}/backups/{filename}", get(get_backup).delete(delete_backup))
        .route("/{path}/{id}/backups/{filename}/restore", post(restore_backup))
        .route("/{path}/{id}/compare/{left}/diff/{right}", get(compare_backups))
}

#[derive(Debug, Serialize)]
pub struct RestoreBackupResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn list_configs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, Vec<ConfigMetadata>>>, AppError> {
    Ok(Json(state.orchestrator.list_configs().await?))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    Path((path, id)): Path<(String, String)>,
) -> Result<Json<Vec<BackupInfo>>, AppError> {
    Ok(Json(state.orchestrator.list_backups(&path, &id).await?))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path((path, id, filename)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let content = state.orchestrator.read_backup(&path, &id, &filename).await?;
    Ok(([(header::CONTENT_TYPE, "application/x-yaml")], content))
}

async fn compare_backups(
    State(state): State<Arc<AppState>>,
    Path((path, id, left, right)): Path<(String, String, String, String)>,
) -> Result<Json<BackupDiffResponse>, AppError> {
    Ok(Json(state.orchestrator.compare(&path, &id, &left, &right).await?))
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path((path, id, filename)): Path<(String, String, String)>,
) -> (StatusCode, Json<RestoreBackupResponse>) {
    match state.orchestrator.restore(&path, &id, &filename).await {
        Ok(message) => (
            StatusCode::OK,
            Json(RestoreBackupResponse {
                success: true,
                message: Some(message),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(path = %path, id = %id, filename = %filename, error = %e, "Restore failed");
            let message = format!("Failed to restore backup: {e}");
            (
                AppError::from(e).status(),
                Json(RestoreBackupResponse {
                    success: false,
                    message: Some(message.clone()),
                    error: Some(message),
                }),
            )
        }
    }
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path((path, id, filename)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    state.orchestrator.delete_backup(&path, &id, &filename).await?;
    Ok(Json(json!({ "status": "backup deleted successfully" })))
}

async fn delete_all_backups(
    State(state): State<Arc<AppState>>,
    Path((path, id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.orchestrator.delete_all_backups(&path, &id).await?;
    tracing::info!(path = %path, id = %id, deleted, "Deleted all backups");
    Ok(Json(json!({ "status": "all backups deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use axum::http::{Method, StatusCode};
    use history_engine::settings::TrackedConfig;

    async fn backed_up() -> (TestApp, String) {
        let app = TestApp::new(vec![
            TrackedConfig::single("Configuration", "configuration.yaml"),
            TrackedConfig::multiple("Automations", "automations.yaml", "id", "alias"),
        ])
        .await;
        app.write("configuration.yaml", "line1\nline2\n");
        app.write("automations.yaml", "- id: a1\n  alias: Lights\n");
        app.send(Method::POST, "/backup", None).await;

        let (_, backups) = app
            .json(Method::GET, "/configs/configuration.yaml/configuration.yaml/backups", None)
            .await;
        let filename = backups[0]["filename"].as_str().unwrap().to_string();
        (app, filename)
    }

    #[tokio::test]
    async fn test_list_configs_and_backups() {
        let (app, filename) = backed_up().await;

        let (status, configs) = app.json(Method::GET, "/configs", None).await;
        assert_eq!(status, StatusCode::OK);
        let entries = configs["Test"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["friendlyName"], "Configuration");
        assert_eq!(entries[0]["backupCount"], 1);
        assert_eq!(entries[1]["id"], "a1");
        assert_eq!(entries[1]["backupType"], "multiple");

        let (status, body) = app
            .send(
                Method::GET,
                &format!("/configs/configuration.yaml/configuration.yaml/backups/{filename}"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"line1\nline2\n");
    }

    #[tokio::test]
    async fn test_encoded_path_segments() {
        let app = TestApp::new(vec![TrackedConfig::single("Lights", "packages/lights.yaml")]).await;
        app.write("packages/lights.yaml", "light: []\n");
        app.send(Method::POST, "/backup", None).await;

        let (status, backups) = app
            .json(
                Method::GET,
                "/configs/packages%2Flights.yaml/packages%2Flights.yaml/backups",
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(backups.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_compare_against_current() {
        let (app, filename) = backed_up().await;
        app.write("configuration.yaml", "line1\nlineX\n");

        let (status, diff) = app
            .json(
                Method::GET,
                &format!("/configs/configuration.yaml/configuration.yaml/compare/{filename}/diff/current"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(diff["type"], "diff");
        assert_eq!(
            diff["unifiedDiff"],
            format!("--- {filename}\n+++ current\n@@ -1,2 +1,2 @@\n line1\n-line2\n+lineX\n")
        );

        let (_, first) = app
            .json(
                Method::GET,
                &format!("/configs/configuration.yaml/configuration.yaml/compare/previous/diff/{filename}"),
                None,
            )
            .await;
        assert_eq!(first["type"], "content");
        assert_eq!(first["isFirstBackup"], true);
    }

    #[tokio::test]
    async fn test_restore_success_and_failure() {
        let (app, filename) = backed_up().await;
        app.write("configuration.yaml", "changed\n");

        let (status, body) = app
            .json(
                Method::POST,
                &format!("/configs/configuration.yaml/configuration.yaml/backups/{filename}/restore"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["message"].as_str().unwrap().starts_with("Successfully restored backup to "));
        assert_eq!(app.read("configuration.yaml"), "line1\nline2\n");

        let (status, body) = app
            .json(
                Method::POST,
                "/configs/configuration.yaml/configuration.yaml/backups/1700000000000-0000.yaml/restore",
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().starts_with("Failed to restore backup: "));
        assert_eq!(body["message"], body["error"]);
    }

    #[tokio::test]
    async fn test_delete_routes() {
        let (app, filename) = backed_up().await;

        let (status, body) = app
            .json(
                Method::DELETE,
                &format!("/configs/configuration.yaml/configuration.yaml/backups/{filename}"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "backup deleted successfully");

        let (status, _) = app
            .send(
                Method::GET,
                &format!("/configs/configuration.yaml/configuration.yaml/backups/{filename}"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app.json(Method::DELETE, "/configs/automations.yaml/a1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "all backups deleted successfully");
        let (_, backups) = app.json(Method::GET, "/configs/automations.yaml/a1/backups", None).await;
        assert_eq!(backups.as_array().unwrap().len(), 0);
    }
}
