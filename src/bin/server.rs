//! HTTP server binary: wires the pipeline together and serves the API.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use talklens::analysis::AnalysisClient;
use talklens::api::{start_http_server, AppState};
use talklens::auth::AuthVerifier;
use talklens::config::Config;
use talklens::task::{MemoryTaskStore, TaskTracker};
use talklens::transcription::TranscriptionClient;
use talklens::worker::WorkerPool;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talklens=info,tower_http=info,warn".into()),
        )
        .init();

    let config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::from_env()
    });
    config.validate()?;
    info!("{}", config.summary());

    let transcriber = Arc::new(TranscriptionClient::new(config.transcription.clone())?);
    let analyzer = Arc::new(AnalysisClient::new(config.analysis.clone())?);
    let auth = Arc::new(AuthVerifier::new(config.auth.clone())?);

    let tracker = Arc::new(TaskTracker::new(Arc::new(MemoryTaskStore::new())));
    let pool = Arc::new(WorkerPool::spawn(
        config.server.workers,
        config.server.queue_capacity,
        tracker.clone(),
        transcriber,
        analyzer,
    ));

    let host = config.server.host.clone();
    let port = config.server.port;
    let state = AppState {
        tracker,
        pool,
        auth,
        config: Arc::new(config),
    };

    start_http_server(state, &host, port).await
}
