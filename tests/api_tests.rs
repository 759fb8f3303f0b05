//! HTTP API tests against an in-process router with stubbed remote services.
#![cfg(feature = "api")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

use talklens::api::{build_router, AppState};
use talklens::auth::AuthVerifier;
use talklens::config::Config;
use talklens::error::PipelineError;
use talklens::task::{MemoryTaskStore, TaskTracker};
use talklens::transcription::{TranscribeOptions, TranscriptSegment, TranscriptionResult};
use talklens::worker::{ReportGenerator, SpeechToText, WorkerPool};

const PLATFORM_TOKEN: &str = "12345:integration-token";
const BOUNDARY: &str = "test-boundary-7f9a2c";

struct StubTranscriber {
    block_forever: bool,
}

#[async_trait]
impl SpeechToText for StubTranscriber {
    async fn transcribe(
        &self,
        _content: &[u8],
        _filename: &str,
        _options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, PipelineError> {
        if self.block_forever {
            std::future::pending::<()>().await;
        }
        Ok(TranscriptionResult {
            text: "hello from the stub".to_string(),
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 2.0,
                text: "hello from the stub".to_string(),
                speaker: Some("Speaker 1".to_string()),
            }],
            language: Some("en".to_string()),
            raw: Default::default(),
        })
    }
}

struct StubAnalyzer;

#[async_trait]
impl ReportGenerator for StubAnalyzer {
    async fn analyze(
        &self,
        transcript: &str,
        _filename: &str,
        _context: Option<&str>,
        _language: &str,
    ) -> Result<String, PipelineError> {
        Ok(format!("<!DOCTYPE html><body>{}</body>", transcript))
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = Some("integration-secret".to_string());
    config.auth.platform_token = Some(PLATFORM_TOKEN.to_string());
    config.auth.allowed_principals = vec!["alice".to_string()];
    config
}

fn test_app(block_transcriber: bool) -> (Router, Arc<TaskTracker>, Arc<AuthVerifier>) {
    let config = test_config();
    let tracker = Arc::new(TaskTracker::new(Arc::new(MemoryTaskStore::new())));
    let pool = Arc::new(WorkerPool::spawn(
        2,
        8,
        tracker.clone(),
        Arc::new(StubTranscriber {
            block_forever: block_transcriber,
        }),
        Arc::new(StubAnalyzer),
    ));
    let auth = Arc::new(AuthVerifier::new(config.auth.clone()).unwrap());

    let state = AppState {
        tracker: tracker.clone(),
        pool,
        auth: auth.clone(),
        config: Arc::new(config),
    };
    (build_router(state), tracker, auth)
}

/// Build a correctly signed login payload for the stub platform token.
fn signed_init_data(username: &str) -> String {
    let auth_date = chrono::Utc::now().timestamp();
    let user = format!(r#"{{"id":42,"username":"{}"}}"#, username);
    let mut fields = vec![
        ("auth_date".to_string(), auth_date.to_string()),
        ("user".to_string(), user),
    ];
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let check_string = fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let mut secret_mac = Hmac::<Sha256>::new_from_slice(b"WebAppData").unwrap();
    secret_mac.update(PLATFORM_TOKEN.as_bytes());
    let secret = secret_mac.finalize().into_bytes();

    let mut mac = Hmac::<Sha256>::new_from_slice(&secret).unwrap();
    mac.update(check_string.as_bytes());
    let hash = hex::encode(mac.finalize().into_bytes());

    let mut pairs: Vec<String> = fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();
    pairs.push(format!("hash={}", hash));
    pairs.join("&")
}

fn multipart_upload(filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
            filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(
        format!(
            "\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; \
            name=\"language\"\r\n\r\nenglish\r\n--{BOUNDARY}--\r\n"
        )
        .as_bytes(),
    );
    body
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_upload(token: &str, filename: &str, content: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/jobs")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_upload(filename, content)))
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let (app, _, _) = test_app(false);
    let response = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn job_endpoints_require_a_token() {
    let (app, _, _) = test_app(false);

    let response = app.clone().oneshot(get("/jobs", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(get("/jobs", Some("not-a-real-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_rejects_a_bad_signature() {
    let (app, _, _) = test_app(false);
    let mut init_data = signed_init_data("alice");
    // Corrupt the hash.
    init_data.pop();
    init_data.push('0');

    let request = Request::builder()
        .method("POST")
        .uri("/auth")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "init_data={}",
            urlencoding::encode(&init_data)
        )))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_submit_and_poll_to_completion() {
    let (app, _, _) = test_app(false);

    // Exchange the login payload for a bearer token.
    let request = Request::builder()
        .method("POST")
        .uri("/auth")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "init_data={}",
            urlencoding::encode(&signed_init_data("alice"))
        )))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["principal"], "alice");
    let token = json["access_token"].as_str().unwrap().to_string();

    // Submit an upload.
    let response = app
        .clone()
        .oneshot(post_upload(&token, "call.mp3", &[0u8; 128]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    let task_id = json["task_id"].as_str().unwrap().to_string();
    assert_eq!(json["status"], "pending");

    // Poll until the stub pipeline finishes.
    let mut completed = false;
    for _ in 0..200 {
        let response = app
            .clone()
            .oneshot(get(&format!("/jobs/{}", task_id), Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        match json["status"].as_str().unwrap() {
            "completed" => {
                assert_eq!(json["progress"], 100);
                completed = true;
                break;
            }
            "failed" => panic!("task failed: {:?}", json["error"]),
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    assert!(completed, "task never completed");

    // Fetch the result.
    let response = app
        .clone()
        .oneshot(get(&format!("/jobs/{}/result", task_id), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["analysis_result"]
        .as_str()
        .unwrap()
        .starts_with("<!DOCTYPE html"));
    assert!(json["transcript"].as_str().unwrap().contains("Speaker 1"));

    // The task shows up in history.
    let response = app.oneshot(get("/jobs", Some(&token))).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["tasks"][0]["task_id"], task_id.as_str());
}

#[tokio::test]
async fn result_of_an_unfinished_task_is_a_conflict() {
    let (app, _, auth) = test_app(true);
    let token = auth.issue_token("alice").unwrap();

    let response = app
        .clone()
        .oneshot(post_upload(&token, "call.mp3", &[0u8; 128]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let task_id = body_json(response).await["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    // The stub transcriber never finishes, so the result cannot exist yet.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let response = app
        .oneshot(get(&format!("/jobs/{}/result", task_id), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (app, _, auth) = test_app(false);
    let token = auth.issue_token("alice").unwrap();

    let response = app
        .oneshot(get("/jobs/no-such-task", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_file_type_is_rejected() {
    let (app, _, auth) = test_app(false);
    let token = auth.issue_token("alice").unwrap();

    let response = app
        .oneshot(post_upload(&token, "notes.txt", b"plain text"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["kind"], "validation");
}

#[tokio::test]
async fn tasks_are_scoped_to_their_owner() {
    let (app, tracker, auth) = test_app(false);
    let token = auth.issue_token("alice").unwrap();

    // A task created by someone else is denied, not hidden.
    let other = tracker.create("bob", "secret.mp3").await;
    let response = app
        .oneshot(get(&format!("/jobs/{}", other.id), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
