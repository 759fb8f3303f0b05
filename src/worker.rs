//! Bounded worker pool driving jobs through the pipeline.
//!
//! Jobs are queued on a bounded channel; when the queue is full, submission
//! fails immediately instead of blocking the caller. Each job runs inside a
//! supervised spawn so a panic in one job marks only that task failed and
//! never takes a worker down.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analysis::{format_transcript_with_speakers, AnalysisClient};
use crate::error::PipelineError;
use crate::task::TaskTracker;
use crate::transcription::{TranscribeOptions, TranscriptionClient, TranscriptionResult};

/// Seam over the transcription backend.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(
        &self,
        content: &[u8],
        filename: &str,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, PipelineError>;
}

#[async_trait]
impl SpeechToText for TranscriptionClient {
    async fn transcribe(
        &self,
        content: &[u8],
        filename: &str,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, PipelineError> {
        TranscriptionClient::transcribe(self, content, filename, options).await
    }
}

/// Seam over the analysis backend.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn analyze(
        &self,
        transcript: &str,
        filename: &str,
        context: Option<&str>,
        language: &str,
    ) -> Result<String, PipelineError>;
}

#[async_trait]
impl ReportGenerator for AnalysisClient {
    async fn analyze(
        &self,
        transcript: &str,
        filename: &str,
        context: Option<&str>,
        language: &str,
    ) -> Result<String, PipelineError> {
        AnalysisClient::analyze(self, transcript, filename, context, language).await
    }
}

/// Everything a worker needs to process one submitted file.
pub struct PipelineJob {
    pub task_id: String,
    pub audio: Vec<u8>,
    pub filename: String,
    pub options: TranscribeOptions,
    pub context: Option<String>,
}

struct WorkerContext {
    tracker: Arc<TaskTracker>,
    stt: Arc<dyn SpeechToText>,
    reporter: Arc<dyn ReportGenerator>,
}

/// Fixed-size pool of pipeline workers fed by a bounded queue.
pub struct WorkerPool {
    sender: mpsc::Sender<PipelineJob>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        workers: usize,
        queue_capacity: usize,
        tracker: Arc<TaskTracker>,
        stt: Arc<dyn SpeechToText>,
        reporter: Arc<dyn ReportGenerator>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<PipelineJob>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let ctx = Arc::new(WorkerContext {
            tracker,
            stt,
            reporter,
        });

        let workers = workers.max(1);
        info!("🚀 Starting {} pipeline workers (queue capacity {})", workers, queue_capacity);

        let handles = (0..workers)
            .map(|worker_id| {
                let receiver = receiver.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, receiver, ctx).await;
                })
            })
            .collect();

        Self { sender, handles }
    }

    /// Enqueue a job. Fails with a transient error when the queue is full so
    /// the caller can report back-pressure instead of waiting.
    pub fn submit(&self, job: PipelineJob) -> Result<(), PipelineError> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PipelineError::Transient("job queue is full, try again later".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                PipelineError::Configuration("worker pool has shut down".to_string())
            }
        })
    }

    /// Stop accepting jobs, drain the queue, and wait for workers to exit.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task did not shut down cleanly: {}", e);
            }
        }
        info!("Worker pool shut down");
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<PipelineJob>>>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            debug!("Worker {} exiting: queue closed", worker_id);
            break;
        };

        let task_id = job.task_id.clone();
        debug!("Worker {} picked up task {}", worker_id, task_id);

        // Supervised run: a panic inside the job fails the task, not the
        // worker.
        let ctx_for_job = ctx.clone();
        let outcome = tokio::spawn(async move { process_job(ctx_for_job, job).await }).await;

        match outcome {
            Ok(()) => {}
            Err(join_err) => {
                error!("Task {} crashed: {}", task_id, join_err);
                let crash = PipelineError::Transient(format!(
                    "internal processing failure: {}",
                    join_err
                ));
                if let Err(e) = ctx.tracker.fail(&task_id, &crash).await {
                    warn!("Could not record crash for task {}: {}", task_id, e);
                }
            }
        }
    }
}

/// Run one job through transcription and analysis, recording every state
/// change on the tracker. Any pipeline error fails the task in place.
async fn process_job(ctx: Arc<WorkerContext>, job: PipelineJob) {
    let task_id = job.task_id.clone();
    if let Err(e) = run_pipeline(&ctx, job).await {
        if let Err(record_err) = ctx.tracker.fail(&task_id, &e).await {
            warn!("Could not record failure for task {}: {}", task_id, record_err);
        }
    }
}

async fn run_pipeline(ctx: &WorkerContext, job: PipelineJob) -> Result<(), PipelineError> {
    ctx.tracker.begin_transcription(&job.task_id).await?;

    let transcription = ctx
        .stt
        .transcribe(&job.audio, &job.filename, &job.options)
        .await?;
    ctx.tracker.transcription_progress(&job.task_id, 60).await?;

    let transcript = format_transcript_with_speakers(&transcription.text, &transcription.segments);
    ctx.tracker.begin_analysis(&job.task_id, &transcript).await?;

    let language = transcription
        .language
        .as_deref()
        .unwrap_or(&job.options.language);
    let report = ctx
        .reporter
        .analyze(&transcript, &job.filename, job.context.as_deref(), language)
        .await?;

    ctx.tracker.complete(&job.task_id, &report).await?;
    Ok(())
}
