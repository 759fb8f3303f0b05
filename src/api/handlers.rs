//! Request handlers: the logic between the HTTP layer and the pipeline.

use tracing::info;

use crate::error::PipelineError;
use crate::task::{TaskStatus, HISTORY_LIMIT};
use crate::transcription::TranscribeOptions;
use crate::validation;
use crate::worker::PipelineJob;

use super::models::{
    AuthResponse, HistoryResponse, ResultView, SubmitResponse, TaskView,
};
use super::server::AppState;

/// A parsed upload, ready to become a pipeline job.
pub struct JobSubmission {
    pub content: Vec<u8>,
    pub filename: String,
    pub options: TranscribeOptions,
    pub context: Option<String>,
}

/// Exchange a verified login payload for a bearer token.
pub async fn login(state: &AppState, init_data: &str) -> Result<AuthResponse, PipelineError> {
    let identity = state.auth.verify_login_payload(init_data)?;
    let access_token = state.auth.issue_token(&identity.principal)?;

    info!("🔑 Issued token for: {}", identity.principal);
    Ok(AuthResponse {
        access_token,
        token_type: "bearer",
        principal: identity.principal,
    })
}

/// Validate the upload, register a task, and queue the job. The task exists
/// before the job is queued so a full queue leaves a failed task behind
/// rather than nothing.
pub async fn submit_job(
    state: &AppState,
    principal: &str,
    submission: JobSubmission,
) -> Result<SubmitResponse, PipelineError> {
    validation::validate(
        &submission.content,
        &submission.filename,
        state.config.transcription.max_file_size,
    )?;
    submission.options.validate()?;

    let task = state.tracker.create(principal, &submission.filename).await;

    let job = PipelineJob {
        task_id: task.id.clone(),
        audio: submission.content,
        filename: submission.filename,
        options: submission.options,
        context: submission.context,
    };

    if let Err(e) = state.pool.submit(job) {
        state.tracker.fail(&task.id, &e).await?;
        return Err(e);
    }

    Ok(SubmitResponse {
        task_id: task.id,
        status: TaskStatus::Pending,
    })
}

/// Current status of one task, scoped to its owner.
pub async fn get_task(
    state: &AppState,
    principal: &str,
    task_id: &str,
) -> Result<TaskView, PipelineError> {
    let task = state.tracker.query(task_id, principal).await?;
    Ok(TaskView::from(task))
}

/// Full result of a completed task. Anything not yet completed is a state
/// conflict, not a missing resource.
pub async fn get_result(
    state: &AppState,
    principal: &str,
    task_id: &str,
) -> Result<ResultView, PipelineError> {
    let task = state.tracker.query(task_id, principal).await?;

    if task.status != TaskStatus::Completed {
        return Err(PipelineError::InvalidTransition(format!(
            "task {} is {}, result is only available once completed",
            task_id, task.status
        )));
    }

    let analysis_result = task.analysis_result.ok_or_else(|| {
        PipelineError::NotFound(format!("task {} has no stored result", task_id))
    })?;

    Ok(ResultView {
        task_id: task.id,
        filename: task.filename,
        transcript: task.transcript,
        analysis_result,
        completed_at: task.completed_at,
    })
}

/// Recent tasks for the caller, newest first.
pub async fn history(state: &AppState, principal: &str) -> Result<HistoryResponse, PipelineError> {
    let tasks = state.tracker.history(principal, HISTORY_LIMIT).await;
    let tasks: Vec<TaskView> = tasks.into_iter().map(TaskView::from).collect();
    let total = tasks.len();
    Ok(HistoryResponse { tasks, total })
}

/// Health payload for load balancers and monitors.
pub fn health() -> serde_json::Value {
    serde_json::json!({
        "status": "healthy",
        "service": "talklens",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}
