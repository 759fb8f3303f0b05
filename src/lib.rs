/// TalkLens - audio transcription and speaking-analysis pipeline
///
/// Uploads audio to a remote Whisper-compatible API, post-processes the
/// transcript with heuristic speaker labels, and turns it into an HTML
/// analysis report through a remote LLM. Jobs run asynchronously on a
/// bounded worker pool and are tracked through a strict state machine.

pub mod analysis;
pub mod auth;
pub mod config;
pub mod error;
pub mod task;
pub mod transcription;
pub mod validation;
pub mod worker;

#[cfg(feature = "api")]
pub mod api;

// Re-export main types for easy access
pub use crate::analysis::AnalysisClient;
pub use crate::auth::{AuthIdentity, AuthVerifier};
pub use crate::config::Config;
pub use crate::error::{ErrorKind, PipelineError};
pub use crate::task::{AnalysisTask, MemoryTaskStore, TaskStatus, TaskStore, TaskTracker};
pub use crate::transcription::{
    TranscribeOptions, TranscriptionClient, TranscriptionResult, TranscriptSegment,
};
pub use crate::worker::{PipelineJob, ReportGenerator, SpeechToText, WorkerPool};
