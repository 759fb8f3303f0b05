//! HTTP server: routing, extraction, and middleware.

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Form, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::AuthVerifier;
use crate::config::Config;
use crate::error::PipelineError;
use crate::task::TaskTracker;
use crate::transcription::TranscribeOptions;
use crate::worker::WorkerPool;

use super::handlers::{self, JobSubmission};
use super::models::{ApiError, AuthRequest};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<TaskTracker>,
    pub pool: Arc<WorkerPool>,
    pub auth: Arc<AuthVerifier>,
    pub config: Arc<Config>,
}

/// Build the router with all routes and middleware attached.
pub fn build_router(state: AppState) -> Router {
    // Uploads can exceed axum's default body limit; the real cap is enforced
    // by file validation.
    let body_limit = state.config.transcription.max_file_size as usize + 1024 * 1024;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth", post(auth_handler))
        .route("/jobs", post(submit_job_handler).get(history_handler))
        .route("/jobs/:id", get(task_status_handler))
        .route("/jobs/:id/result", get(task_result_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}

/// Configure and start the HTTP server.
pub async fn start_http_server(state: AppState, host: &str, port: u16) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    info!("🌐 API server listening on http://{}:{}", host, port);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(handlers::health()))
}

async fn auth_handler(
    State(state): State<AppState>,
    Form(request): Form<AuthRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = handlers::login(&state, &request.init_data).await?;
    Ok((StatusCode::OK, Json(response)))
}

async fn submit_job_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers)?;
    let submission = parse_submission(multipart, &state).await?;
    let response = handlers::submit_job(&state, &identity.principal, submission).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn task_status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers)?;
    let view = handlers::get_task(&state, &identity.principal, &id).await?;
    Ok((StatusCode::OK, Json(view)))
}

async fn task_result_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers)?;
    let view = handlers::get_result(&state, &identity.principal, &id).await?;
    Ok((StatusCode::OK, Json(view)))
}

async fn history_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers)?;
    let response = handlers::history(&state, &identity.principal).await?;
    Ok((StatusCode::OK, Json(response)))
}

/// Verify the bearer token on a request.
fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<crate::auth::AuthIdentity, PipelineError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
        })
        .ok_or(PipelineError::InvalidCredential)?;

    state.auth.verify_token(token)
}

/// Pull the file and per-request options out of a multipart upload.
async fn parse_submission(
    mut multipart: Multipart,
    state: &AppState,
) -> Result<JobSubmission, PipelineError> {
    let defaults = &state.config.pipeline;
    let mut content: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut options = TranscribeOptions {
        language: defaults.language.clone(),
        speaker_labels: defaults.speaker_labels,
        ..TranscribeOptions::default()
    };
    let mut context: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::validation("multipart", format!("malformed upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| {
                    PipelineError::validation("multipart", format!("could not read file: {}", e))
                })?;
                content = Some(bytes.to_vec());
            }
            "language" => options.language = read_text(field, "language").await?,
            "prompt" => options.prompt = Some(read_text(field, "prompt").await?),
            "context" => context = Some(read_text(field, "context").await?),
            "translate" => options.translate = read_bool(field, "translate").await?,
            "speaker_labels" => {
                options.speaker_labels = read_bool(field, "speaker_labels").await?
            }
            "min_speakers" => {
                options.min_speakers = Some(read_number(field, "min_speakers").await?)
            }
            "max_speakers" => {
                options.max_speakers = Some(read_number(field, "max_speakers").await?)
            }
            // Unknown fields are ignored rather than rejected.
            _ => {}
        }
    }

    let content = content.ok_or_else(|| {
        PipelineError::validation("multipart", "missing 'file' field in upload")
    })?;
    let filename = filename.ok_or_else(|| {
        PipelineError::validation("multipart", "uploaded file has no filename")
    })?;

    Ok(JobSubmission {
        content,
        filename,
        options,
        context,
    })
}

async fn read_text(
    field: axum::extract::multipart::Field<'_>,
    name: &'static str,
) -> Result<String, PipelineError> {
    field
        .text()
        .await
        .map_err(|e| PipelineError::validation(name, format!("could not read field: {}", e)))
}

async fn read_bool(
    field: axum::extract::multipart::Field<'_>,
    name: &'static str,
) -> Result<bool, PipelineError> {
    let text = read_text(field, name).await?;
    match text.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(PipelineError::validation(
            name,
            format!("expected a boolean, got '{}'", other),
        )),
    }
}

async fn read_number(
    field: axum::extract::multipart::Field<'_>,
    name: &'static str,
) -> Result<u32, PipelineError> {
    let text = read_text(field, name).await?;
    text.trim()
        .parse()
        .map_err(|_| PipelineError::validation(name, format!("expected a number, got '{}'", text)))
}
