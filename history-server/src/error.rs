use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use history_engine::{EngineError, ErrorKind};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => AppError::NotFound(e.to_string()),
            ErrorKind::ValidationError => AppError::BadRequest(e.to_string()),
            ErrorKind::ConcurrencyConflict => AppError::Conflict(e.to_string()),
            ErrorKind::ReadError | ErrorKind::WriteError if e.is_retryable() => {
                AppError::ServiceUnavailable(e.to_string())
            }
            ErrorKind::ReadError | ErrorKind::WriteError => AppError::Internal(e.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = match &self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
