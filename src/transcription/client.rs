use std::future::Future;
use std::time::Duration;

use reqwest::multipart;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::TranscriptionConfig;
use crate::error::PipelineError;
use crate::validation;

use super::{diarization, TranscribeOptions, TranscriptionResult};

/// Client for a Whisper-compatible remote transcription endpoint.
///
/// Owns the retry/backoff policy and error classification: connection
/// failures, request timeouts and remote 5xx responses are retried with
/// exponential backoff; any 4xx fails immediately as a client error.
#[derive(Debug)]
pub struct TranscriptionClient {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

/// Outcome of a single request attempt, as seen by the retry loop.
pub(crate) enum AttemptError {
    /// Likely-temporary failure, eligible for another attempt.
    Retryable(String),
    /// Classified failure that must surface immediately.
    Fatal(PipelineError),
}

/// Run `op` up to `max_attempts` times with exponential backoff starting at
/// `base_delay` (delays of base, 2*base, ... between attempts). Exhaustion
/// surfaces a single transient error referencing the last failure.
pub(crate) async fn with_retry<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut last_failure = String::new();

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = base_delay * 2u32.pow(attempt - 1);
            debug!("Backing off {:.1}s before attempt {}", delay.as_secs_f64(), attempt + 1);
            tokio::time::sleep(delay).await;
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(err)) => return Err(err),
            Err(AttemptError::Retryable(reason)) => {
                warn!("Attempt {}/{} failed: {}", attempt + 1, max_attempts, reason);
                last_failure = reason;
            }
        }
    }

    Err(PipelineError::Transient(format!(
        "request failed after {} attempts: {}",
        max_attempts, last_failure
    )))
}

#[derive(Debug, Deserialize)]
struct ApiTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<super::TranscriptSegment>,
    #[serde(default)]
    language: Option<String>,
    #[serde(flatten)]
    raw: serde_json::Map<String, serde_json::Value>,
}

impl TranscriptionClient {
    /// Create a client from configuration. Fails with a configuration error
    /// when the endpoint or API key is missing.
    pub fn new(config: TranscriptionConfig) -> Result<Self, PipelineError> {
        if config.api_url.as_deref().map_or(true, str::is_empty) {
            return Err(PipelineError::Configuration(
                "transcription API URL is not configured".to_string(),
            ));
        }
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(PipelineError::Configuration(
                "transcription API key is not configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Endpoint for the request: the translation variant produces English
    /// output regardless of source language.
    fn endpoint(&self, translate: bool) -> String {
        let base = self
            .config
            .api_url
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/');
        if translate {
            format!("{}/translations", base)
        } else {
            format!("{}/transcriptions", base)
        }
    }

    /// Upload audio and return the parsed transcription.
    ///
    /// Validates the file and options first, then applies the bounded retry
    /// policy. When speaker labels are requested with more than one expected
    /// speaker, segments are labeled by the diarization post-processor before
    /// returning.
    pub async fn transcribe(
        &self,
        content: &[u8],
        filename: &str,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, PipelineError> {
        let file = validation::validate(content, filename, self.config.max_file_size)?;
        options.validate()?;

        let endpoint = self.endpoint(options.translate);
        info!("🎤 Starting transcription for: {}", filename);
        debug!(
            "API parameters: language={}, speaker_labels={}, translate={}",
            options.language, options.speaker_labels, options.translate
        );

        let api_key = self.config.api_key.clone().unwrap_or_default();
        let model = self.config.model.clone();

        let parsed: ApiTranscription = with_retry(
            self.config.max_retries.max(1),
            Duration::from_secs(self.config.backoff_base_secs),
            |_attempt| {
                let client = self.client.clone();
                let endpoint = endpoint.clone();
                let api_key = api_key.clone();
                let model = model.clone();
                let content = content.to_vec();
                let filename = file.filename.clone();
                let content_type = file.content_type;
                let options = options.clone();

                async move {
                    let form = build_form(content, &filename, content_type, &model, &options)
                        .map_err(AttemptError::Fatal)?;

                    let response = client
                        .post(&endpoint)
                        .bearer_auth(&api_key)
                        .header(reqwest::header::USER_AGENT, "talklens/0.1")
                        .multipart(form)
                        .send()
                        .await;

                    match response {
                        Ok(resp) => {
                            let status = resp.status();
                            if status.is_success() {
                                resp.json::<ApiTranscription>().await.map_err(|e| {
                                    AttemptError::Fatal(PipelineError::validation(
                                        "response_schema",
                                        format!("unexpected transcription payload: {}", e),
                                    ))
                                })
                            } else {
                                let body = resp.text().await.unwrap_or_default();
                                Err(classify_response(status, &body))
                            }
                        }
                        Err(e) if e.is_timeout() => {
                            Err(AttemptError::Retryable(format!("request timeout: {}", e)))
                        }
                        Err(e) if e.is_connect() => {
                            Err(AttemptError::Retryable(format!("connection error: {}", e)))
                        }
                        Err(e) => Err(AttemptError::Fatal(PipelineError::Client(format!(
                            "request failed: {}",
                            e
                        )))),
                    }
                }
            },
        )
        .await?;

        let mut result = TranscriptionResult {
            text: parsed.text,
            segments: parsed.segments,
            language: parsed.language,
            raw: parsed.raw,
        };

        if options.speaker_labels && options.min_speakers.unwrap_or(1) > 1 {
            let max_speakers = options.max_speakers.unwrap_or(8);
            diarization::label_speakers(&mut result.segments, max_speakers);
        }

        info!(
            "✅ Transcription completed for {}: {} characters, {} segments",
            filename,
            result.text.len(),
            result.segments.len()
        );
        Ok(result)
    }
}

fn build_form(
    content: Vec<u8>,
    filename: &str,
    content_type: &'static str,
    model: &str,
    options: &TranscribeOptions,
) -> Result<multipart::Form, PipelineError> {
    let part = multipart::Part::bytes(content)
        .file_name(filename.to_string())
        .mime_str(content_type)
        .map_err(|e| PipelineError::Configuration(format!("invalid MIME type: {}", e)))?;

    let mut form = multipart::Form::new()
        .part("file", part)
        .text("model", model.to_string())
        .text("response_format", "verbose_json");

    if let Some(code) = language_code(&options.language) {
        form = form.text("language", code);
    }

    if let Some(prompt) = options.prompt.as_deref() {
        if !prompt.trim().is_empty() {
            form = form.text("prompt", prompt.trim().to_string());
        }
    }

    for granularity in &options.timestamp_granularities {
        form = form.text("timestamp_granularities[]", granularity.as_str());
    }

    Ok(form)
}

/// Classify a non-success transcription response: any 4xx is a permanent
/// client failure, everything else (5xx and unexpected codes) stays eligible
/// for retry.
fn classify_response(status: reqwest::StatusCode, body: &str) -> AttemptError {
    if status.is_client_error() {
        AttemptError::Fatal(PipelineError::Client(format!(
            "transcription API rejected the request ({}): {}",
            status,
            truncate(body, 200)
        )))
    } else {
        AttemptError::Retryable(format!("server error {}", status))
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Map a language name to its ISO 639-1 code. Short inputs that already look
/// like a code are passed through unchanged.
pub fn language_code(language: &str) -> Option<String> {
    let lower = language.trim().to_lowercase();
    let code = match lower.as_str() {
        "english" => "en",
        "spanish" => "es",
        "french" => "fr",
        "german" => "de",
        "italian" => "it",
        "portuguese" => "pt",
        "russian" => "ru",
        "japanese" => "ja",
        "korean" => "ko",
        "chinese" => "zh",
        "arabic" => "ar",
        "hindi" => "hi",
        "dutch" => "nl",
        "swedish" => "sv",
        "danish" => "da",
        "norwegian" => "no",
        "finnish" => "fi",
        "polish" => "pl",
        "czech" => "cs",
        "hungarian" => "hu",
        "romanian" => "ro",
        "bulgarian" => "bg",
        "ukrainian" => "uk",
        "turkish" => "tr",
        "greek" => "el",
        "hebrew" => "he",
        "thai" => "th",
        "vietnamese" => "vi",
        "indonesian" => "id",
        "malay" => "ms",
        _ => {
            // Pass 2-3 letter inputs through as-is; otherwise omit the field
            // and let the API auto-detect.
            if (2..=3).contains(&lower.len()) && lower.chars().all(|c| c.is_ascii_lowercase()) {
                return Some(lower);
            }
            return None;
        }
    };
    Some(code.to_string())
}
