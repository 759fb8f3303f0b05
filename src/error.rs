use serde::{Deserialize, Serialize};

/// Classified error taxonomy for the transcription/analysis pipeline.
///
/// The HTTP clients translate every transport-level failure into one of these
/// variants before it reaches the task tracker, so stored task errors always
/// carry a classification rather than a raw transport error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Bad input from the caller. Never retried.
    #[error("validation failed ({constraint}): {reason}")]
    Validation {
        constraint: &'static str,
        reason: String,
    },

    /// Missing credentials or endpoints. Fatal at startup or first use.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The remote service rejected the request (4xx). Not retried.
    #[error("client error: {0}")]
    Client(String),

    /// Network failure, timeout, or remote 5xx. Retried up to the policy
    /// limit, then surfaced.
    #[error("transient error: {0}")]
    Transient(String),

    /// Authenticated but not authorized.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Authentication itself failed. Deliberately carries no detail about
    /// which check failed.
    #[error("invalid credential")]
    InvalidCredential,

    #[error("not found: {0}")]
    NotFound(String),

    /// A state-machine transition that is not allowed from the current state,
    /// including any mutation of a terminal task.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

impl PipelineError {
    pub fn validation(constraint: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            constraint,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Client(_) => ErrorKind::Client,
            Self::Transient(_) => ErrorKind::Transient,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::InvalidCredential => ErrorKind::InvalidCredential,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
        }
    }
}

/// Serializable classification stored alongside a failed task's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Configuration,
    Client,
    Transient,
    AccessDenied,
    InvalidCredential,
    NotFound,
    InvalidTransition,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Configuration => "configuration",
            Self::Client => "client",
            Self::Transient => "transient",
            Self::AccessDenied => "access_denied",
            Self::InvalidCredential => "invalid_credential",
            Self::NotFound => "not_found",
            Self::InvalidTransition => "invalid_transition",
        };
        write!(f, "{}", name)
    }
}
