//! Wire types for the HTTP API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PipelineError};
use crate::task::{AnalysisTask, TaskError, TaskStatus};

/// Error payload returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(skip)]
    status: StatusCode,
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let kind = err.kind();
        // An oversized upload gets its dedicated status instead of a plain 400.
        let status = match &err {
            PipelineError::Validation {
                constraint: "file_size",
                ..
            } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => status_for_kind(kind),
        };
        Self {
            error: err.to_string(),
            kind,
            status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({
            "error": self.error,
            "kind": self.kind,
        })))
            .into_response()
    }
}

/// HTTP status for each error classification.
pub fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Client => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidCredential => StatusCode::UNAUTHORIZED,
        ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::Transient => StatusCode::BAD_GATEWAY,
        ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub init_data: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub principal: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Task status as reported to the client. The transcript and report are
/// deliberately absent; they are served from the result endpoint.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub task_id: String,
    pub filename: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl From<AnalysisTask> for TaskView {
    fn from(task: AnalysisTask) -> Self {
        Self {
            task_id: task.id,
            filename: task.filename,
            status: task.status,
            progress: task.progress,
            created_at: task.created_at,
            completed_at: task.completed_at,
            error: task.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub task_id: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub analysis_result: String,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub tasks: Vec<TaskView>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversize_upload_maps_to_413() {
        let err = PipelineError::validation("file_size", "file too large: 120.0MB (max: 100MB)");
        let api_err = ApiError::from(err);
        assert_eq!(api_err.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(api_err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_kind(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_kind(ErrorKind::InvalidCredential), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for_kind(ErrorKind::AccessDenied), StatusCode::FORBIDDEN);
        assert_eq!(status_for_kind(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for_kind(ErrorKind::InvalidTransition), StatusCode::CONFLICT);
        assert_eq!(status_for_kind(ErrorKind::Transient), StatusCode::BAD_GATEWAY);
    }
}
