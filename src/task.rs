//! Task lifecycle tracking for the asynchronous pipeline.
//!
//! Every submitted job becomes an [`AnalysisTask`] that moves through a fixed
//! state machine: `Pending -> Transcribing -> Analyzing -> Completed`, with
//! `Failed` reachable from any non-terminal state. Terminal states never
//! change again; an attempt to move a terminal task is an error, not a no-op.
//!
//! The [`TaskTracker`] serializes all transitions and enforces a
//! single-writer rule: a task is claimed when transcription begins and
//! released only on reaching a terminal state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineError};

/// Maximum number of tasks returned by a history listing.
pub const HISTORY_LIMIT: usize = 50;

/// Where a task is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Transcribing,
    Analyzing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Transcribing => "transcribing",
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure recorded on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for TaskError {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A single submitted job and everything produced for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: String,
    /// Principal that submitted the job; only they may query it.
    pub owner: String,
    pub filename: String,
    pub status: TaskStatus,
    /// Coarse progress percentage, monotone within a task's lifetime.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisTask {
    fn new(owner: &str, filename: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            filename: filename.to_string(),
            status: TaskStatus::Pending,
            progress: 0,
            transcript: None,
            analysis_result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Persistence seam for tasks. The in-memory store is the only implementation
/// shipped; a durable store can replace it without touching the tracker.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: AnalysisTask);
    async fn get(&self, id: &str) -> Option<AnalysisTask>;
    async fn put(&self, task: AnalysisTask);
    /// Tasks for one owner, newest first, at most `limit`.
    async fn list_for_owner(&self, owner: &str, limit: usize) -> Vec<AnalysisTask>;
}

/// Process-local task store.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, AnalysisTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: AnalysisTask) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    async fn get(&self, id: &str) -> Option<AnalysisTask> {
        self.tasks.read().await.get(id).cloned()
    }

    async fn put(&self, task: AnalysisTask) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    async fn list_for_owner(&self, owner: &str, limit: usize) -> Vec<AnalysisTask> {
        let tasks = self.tasks.read().await;
        let mut owned: Vec<_> = tasks
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit);
        owned
    }
}

/// Owns every state transition. All reads-modify-writes go through one lock,
/// so observers never see a half-applied transition.
pub struct TaskTracker {
    store: Arc<dyn TaskStore>,
    /// Tasks currently claimed by a worker.
    claims: Mutex<HashSet<String>>,
    /// Serializes transitions across tasks.
    transition: Mutex<()>,
}

impl TaskTracker {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            claims: Mutex::new(HashSet::new()),
            transition: Mutex::new(()),
        }
    }

    /// Register a new pending task and return it.
    pub async fn create(&self, owner: &str, filename: &str) -> AnalysisTask {
        let task = AnalysisTask::new(owner, filename);
        info!("📋 Created task {} for {} ({})", task.id, owner, filename);
        self.store.insert(task.clone()).await;
        task
    }

    /// Claim a pending task for processing and move it to `Transcribing`.
    pub async fn begin_transcription(&self, id: &str) -> Result<(), PipelineError> {
        let _guard = self.transition.lock().await;
        let mut task = self.load(id).await?;

        if task.status != TaskStatus::Pending {
            return Err(self.invalid_transition(&task, TaskStatus::Transcribing));
        }

        let mut claims = self.claims.lock().await;
        if !claims.insert(id.to_string()) {
            return Err(PipelineError::InvalidTransition(format!(
                "task {} is already claimed by another worker",
                id
            )));
        }
        drop(claims);

        task.status = TaskStatus::Transcribing;
        task.progress = task.progress.max(10);
        self.store.put(task).await;
        Ok(())
    }

    /// Advance progress within the transcribing phase. Progress never moves
    /// backwards; a stale lower value is ignored.
    pub async fn transcription_progress(&self, id: &str, percent: u8) -> Result<(), PipelineError> {
        let _guard = self.transition.lock().await;
        let mut task = self.load(id).await?;

        if task.status != TaskStatus::Transcribing {
            return Err(PipelineError::InvalidTransition(format!(
                "task {} is {}, cannot report transcription progress",
                id, task.status
            )));
        }

        let next = percent.min(100);
        if next != percent {
            debug!("Task {} progress {} clamped to {}", id, percent, next);
        }
        if next <= task.progress {
            debug!(
                "Task {} progress report {} ignored (already at {})",
                id, next, task.progress
            );
            return Ok(());
        }

        task.progress = next;
        self.store.put(task).await;
        Ok(())
    }

    /// Record the transcript and move to `Analyzing`.
    pub async fn begin_analysis(&self, id: &str, transcript: &str) -> Result<(), PipelineError> {
        let _guard = self.transition.lock().await;
        let mut task = self.load(id).await?;

        if task.status != TaskStatus::Transcribing {
            return Err(self.invalid_transition(&task, TaskStatus::Analyzing));
        }

        task.status = TaskStatus::Analyzing;
        task.progress = task.progress.max(70);
        task.transcript = Some(transcript.to_string());
        self.store.put(task).await;
        Ok(())
    }

    /// Record the report and finish the task.
    pub async fn complete(&self, id: &str, report: &str) -> Result<(), PipelineError> {
        let _guard = self.transition.lock().await;
        let mut task = self.load(id).await?;

        if task.status != TaskStatus::Analyzing {
            return Err(self.invalid_transition(&task, TaskStatus::Completed));
        }

        task.status = TaskStatus::Completed;
        task.progress = 100;
        task.analysis_result = Some(report.to_string());
        task.completed_at = Some(Utc::now());
        self.store.put(task.clone()).await;
        self.release(id).await;

        info!("✅ Task {} completed ({})", id, task.filename);
        Ok(())
    }

    /// Fail a non-terminal task with a classified error. Progress is kept as
    /// a record of how far processing got.
    pub async fn fail(&self, id: &str, error: &PipelineError) -> Result<(), PipelineError> {
        let _guard = self.transition.lock().await;
        let mut task = self.load(id).await?;

        if task.status.is_terminal() {
            return Err(self.invalid_transition(&task, TaskStatus::Failed));
        }

        warn!("❌ Task {} failed: {}", id, error);
        task.status = TaskStatus::Failed;
        task.error = Some(TaskError::from(error));
        task.completed_at = Some(Utc::now());
        self.store.put(task).await;
        self.release(id).await;
        Ok(())
    }

    /// Fetch a task on behalf of a principal. A task owned by someone else is
    /// denied, not hidden.
    pub async fn query(&self, id: &str, principal: &str) -> Result<AnalysisTask, PipelineError> {
        let task = self.load(id).await?;
        if task.owner != principal {
            return Err(PipelineError::AccessDenied(format!(
                "task {} belongs to another principal",
                id
            )));
        }
        Ok(task)
    }

    /// Recent tasks for a principal, newest first, capped at
    /// [`HISTORY_LIMIT`].
    pub async fn history(&self, principal: &str, limit: usize) -> Vec<AnalysisTask> {
        self.store
            .list_for_owner(principal, limit.min(HISTORY_LIMIT))
            .await
    }

    async fn load(&self, id: &str) -> Result<AnalysisTask, PipelineError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| PipelineError::NotFound(format!("task {} does not exist", id)))
    }

    async fn release(&self, id: &str) {
        self.claims.lock().await.remove(id);
    }

    fn invalid_transition(&self, task: &AnalysisTask, target: TaskStatus) -> PipelineError {
        PipelineError::InvalidTransition(format!(
            "task {} is {}, cannot move to {}",
            task.id, task.status, target
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TaskTracker {
        TaskTracker::new(Arc::new(MemoryTaskStore::new()))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let tracker = tracker();
        let task = tracker.create("alice", "call.mp3").await;
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);

        tracker.begin_transcription(&task.id).await.unwrap();
        tracker.transcription_progress(&task.id, 60).await.unwrap();
        tracker.begin_analysis(&task.id, "the transcript").await.unwrap();
        tracker.complete(&task.id, "<!DOCTYPE html>...").await.unwrap();

        let done = tracker.query(&task.id, "alice").await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.transcript.as_deref(), Some("the transcript"));
        assert_eq!(done.analysis_result.as_deref(), Some("<!DOCTYPE html>..."));
        assert!(done.completed_at.is_some());
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_progress_is_monotone() {
        let tracker = tracker();
        let task = tracker.create("alice", "call.mp3").await;
        tracker.begin_transcription(&task.id).await.unwrap();

        tracker.transcription_progress(&task.id, 50).await.unwrap();
        tracker.transcription_progress(&task.id, 30).await.unwrap();

        let current = tracker.query(&task.id, "alice").await.unwrap();
        assert_eq!(current.progress, 50);
    }

    #[tokio::test]
    async fn test_progress_is_clamped_at_100() {
        let tracker = tracker();
        let task = tracker.create("alice", "call.mp3").await;
        tracker.begin_transcription(&task.id).await.unwrap();

        tracker.transcription_progress(&task.id, 150).await.unwrap();

        let current = tracker.query(&task.id, "alice").await.unwrap();
        assert_eq!(current.progress, 100);
    }

    #[tokio::test]
    async fn test_cannot_skip_states() {
        let tracker = tracker();
        let task = tracker.create("alice", "call.mp3").await;

        let err = tracker.complete(&task.id, "report").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let err = tracker.begin_analysis(&task.id, "t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn test_terminal_tasks_are_frozen() {
        let tracker = tracker();
        let task = tracker.create("alice", "call.mp3").await;
        tracker.begin_transcription(&task.id).await.unwrap();
        tracker
            .fail(&task.id, &PipelineError::Transient("boom".to_string()))
            .await
            .unwrap();

        let err = tracker
            .fail(&task.id, &PipelineError::Transient("again".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let failed = tracker.query(&task.id, "alice").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_failure_keeps_progress() {
        let tracker = tracker();
        let task = tracker.create("alice", "call.mp3").await;
        tracker.begin_transcription(&task.id).await.unwrap();
        tracker.transcription_progress(&task.id, 60).await.unwrap();
        tracker
            .fail(&task.id, &PipelineError::Client("rejected".to_string()))
            .await
            .unwrap();

        let failed = tracker.query(&task.id, "alice").await.unwrap();
        assert_eq!(failed.progress, 60);
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_double_claim_is_rejected() {
        let tracker = tracker();
        let task = tracker.create("alice", "call.mp3").await;
        tracker.begin_transcription(&task.id).await.unwrap();

        let err = tracker.begin_transcription(&task.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn test_query_enforces_ownership() {
        let tracker = tracker();
        let task = tracker.create("alice", "call.mp3").await;

        let err = tracker.query(&task.id, "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        let err = tracker.query("no-such-task", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_query_is_idempotent() {
        let tracker = tracker();
        let task = tracker.create("alice", "call.mp3").await;
        tracker.begin_transcription(&task.id).await.unwrap();

        let first = tracker.query(&task.id, "alice").await.unwrap();
        let second = tracker.query(&task.id, "alice").await.unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.progress, second.progress);
    }

    #[tokio::test]
    async fn test_history_is_per_owner_and_capped() {
        let tracker = tracker();
        for i in 0..60 {
            tracker.create("alice", &format!("call-{}.mp3", i)).await;
        }
        tracker.create("bob", "other.mp3").await;

        let history = tracker.history("alice", 100).await;
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert!(history.iter().all(|t| t.owner == "alice"));

        let bob = tracker.history("bob", 10).await;
        assert_eq!(bob.len(), 1);
    }
}
