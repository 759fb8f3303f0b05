//! Report generation against a remote text-analysis (LLM) endpoint.
//!
//! One prompt, one call, no retry: a failed call surfaces immediately with a
//! classified error so the task tracker can record it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::transcription::TranscriptSegment;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DOCUMENT_MARKER: &str = "<!DOCTYPE html";

/// Client for the chat-style analysis endpoint.
#[derive(Debug)]
pub struct AnalysisClient {
    config: AnalysisConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct AnalysisRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl AnalysisClient {
    pub fn new(config: AnalysisConfig) -> Result<Self, PipelineError> {
        if config.api_url.as_deref().map_or(true, str::is_empty) {
            return Err(PipelineError::Configuration(
                "analysis API URL is not configured".to_string(),
            ));
        }
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(PipelineError::Configuration(
                "analysis API key is not configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Send the speaker-formatted transcript for analysis and return an HTML
    /// report. A response that does not start with the document marker is
    /// wrapped in a minimal valid shell rather than rejected.
    pub async fn analyze(
        &self,
        transcript: &str,
        filename: &str,
        context: Option<&str>,
        language: &str,
    ) -> Result<String, PipelineError> {
        let prompt = build_prompt(transcript, filename, context, language);

        let request = AnalysisRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        info!("🧠 Starting analysis for: {}", filename);

        let endpoint = self.config.api_url.as_deref().unwrap_or_default();
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let response = self
            .client
            .post(endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Transient(format!(
                        "analysis timeout after {}s",
                        self.config.timeout_secs
                    ))
                } else {
                    PipelineError::Transient(format!("network error during analysis: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: AnalysisResponse = response.json().await.map_err(|e| {
            PipelineError::validation(
                "response_schema",
                format!("unexpected analysis payload: {}", e),
            )
        })?;

        let text = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| {
                PipelineError::validation("response_schema", "analysis response has no content")
            })?;

        let report = if text.trim_start().starts_with(DOCUMENT_MARKER) {
            text
        } else {
            warn!("Analysis response is not a complete HTML document, wrapping");
            wrap_in_document(&text, filename)
        };

        info!(
            "✅ Analysis report generated for {} ({} characters)",
            filename,
            report.len()
        );
        Ok(report)
    }
}

/// Classify a non-success analysis response by status code.
fn classify_status(status: u16, body: &str) -> PipelineError {
    match status {
        401 => PipelineError::Client("analysis API key was rejected".to_string()),
        429 => PipelineError::Transient("analysis API rate limit exceeded".to_string()),
        s if s >= 500 => PipelineError::Transient(format!("analysis API server error {}", s)),
        s => PipelineError::Client(format!("analysis API error {}: {}", s, body)),
    }
}

/// Render segments as `Speaker N [MM:SS]: text` lines, falling back to the
/// plain text when no segments are available.
pub fn format_transcript_with_speakers(text: &str, segments: &[TranscriptSegment]) -> String {
    if segments.is_empty() {
        return text.to_string();
    }

    let mut lines = Vec::with_capacity(segments.len());
    for segment in segments {
        let segment_text = segment.text.trim();
        if segment_text.is_empty() {
            continue;
        }

        let speaker = segment.speaker.as_deref().unwrap_or("Speaker 1");
        let minutes = (segment.start / 60.0) as u64;
        let seconds = (segment.start % 60.0) as u64;
        lines.push(format!(
            "{} [{:02}:{:02}]: {}",
            speaker, minutes, seconds, segment_text
        ));
    }

    if lines.is_empty() {
        text.to_string()
    } else {
        lines.join("\n")
    }
}

fn build_prompt(transcript: &str, filename: &str, context: Option<&str>, language: &str) -> String {
    let context_line = context
        .filter(|c| !c.trim().is_empty())
        .map(|c| format!("\n- Additional Context: {}", c.trim()))
        .unwrap_or_default();

    format!(
        "Analyze this speaking session transcript and create a comprehensive HTML report.\n\
        \n\
        TRANSCRIPT:\n\
        {transcript}\n\
        \n\
        CONTEXT:\n\
        - Filename: {filename}\n\
        - Original Language: {language}{context_line}\n\
        \n\
        Create a complete HTML page with:\n\
        1. **Executive Summary** - Key insights overview (2-3 sentences)\n\
        2. **Speaker Analysis** - Individual speaking patterns, style, and statistics\n\
        3. **Communication Metrics** - Speaking time distribution, word count, pace analysis\n\
        4. **Key Topics & Themes** - Main discussion points and content analysis\n\
        5. **Engagement Quality** - Interaction patterns, turn-taking, and effectiveness\n\
        6. **Recommendations** - Specific, actionable improvement suggestions\n\
        7. **Detailed Transcript** - Clean, formatted version with timestamps\n\
        \n\
        Technical requirements:\n\
        - Complete HTML document with embedded CSS styling\n\
        - Modern, responsive design with a professional color scheme\n\
        - Mobile-friendly layout with proper viewport settings\n\
        - Use actual data from the transcript for all metrics\n\
        - Print-friendly styles with @media print rules\n\
        \n\
        Return ONLY the complete HTML starting with <!DOCTYPE html>"
    )
}

/// Wrap raw analysis text in a minimal valid HTML document.
fn wrap_in_document(content: &str, filename: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
        <html lang=\"en\">\n\
        <head>\n\
        <meta charset=\"UTF-8\">\n\
        <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
        <title>Analysis Report - {filename}</title>\n\
        </head>\n\
        <body>\n\
        <h1>Analysis Report</h1>\n\
        <p>Generated for: <strong>{filename}</strong></p>\n\
        <p><em>Note: the analysis response was not in the expected HTML format; \
        this is a fallback rendering.</em></p>\n\
        <pre>{content}</pre>\n\
        </body>\n\
        </html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn seg(start: f64, end: f64, text: &str, speaker: Option<&str>) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
            speaker: speaker.map(str::to_string),
        }
    }

    #[test]
    fn test_requires_configuration() {
        let config = AnalysisConfig {
            api_key: None,
            ..AnalysisConfig::default()
        };
        let err = AnalysisClient::new(config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(401, "").kind(), ErrorKind::Client);
        assert_eq!(classify_status(429, "").kind(), ErrorKind::Transient);
        assert_eq!(classify_status(500, "").kind(), ErrorKind::Transient);
        assert_eq!(classify_status(503, "").kind(), ErrorKind::Transient);
        assert_eq!(classify_status(422, "bad request").kind(), ErrorKind::Client);
    }

    #[test]
    fn test_transcript_formatting() {
        let segments = vec![
            seg(0.0, 4.0, "Hello everyone.", Some("Speaker 1")),
            seg(65.5, 70.0, "Thanks for joining.", Some("Speaker 2")),
            seg(71.0, 72.0, "   ", Some("Speaker 1")),
        ];
        let formatted = format_transcript_with_speakers("fallback", &segments);

        let lines: Vec<_> = formatted.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Speaker 1 [00:00]: Hello everyone.");
        assert_eq!(lines[1], "Speaker 2 [01:05]: Thanks for joining.");
    }

    #[test]
    fn test_formatting_falls_back_to_plain_text() {
        let formatted = format_transcript_with_speakers("plain text", &[]);
        assert_eq!(formatted, "plain text");
    }

    #[test]
    fn test_unlabeled_segments_get_default_speaker() {
        let segments = vec![seg(0.0, 2.0, "Hi.", None)];
        let formatted = format_transcript_with_speakers("", &segments);
        assert_eq!(formatted, "Speaker 1 [00:00]: Hi.");
    }

    #[test]
    fn test_prompt_embeds_transcript_and_context() {
        let prompt = build_prompt("Speaker 1 [00:00]: Hi.", "call.mp3", Some("weekly sync"), "english");
        assert!(prompt.contains("Speaker 1 [00:00]: Hi."));
        assert!(prompt.contains("call.mp3"));
        assert!(prompt.contains("Additional Context: weekly sync"));
        assert!(prompt.ends_with("starting with <!DOCTYPE html>"));
    }

    #[test]
    fn test_wrap_produces_complete_document() {
        let doc = wrap_in_document("Some analysis notes", "call.mp3");
        assert!(doc.starts_with(DOCUMENT_MARKER));
        assert!(doc.contains("Some analysis notes"));
        assert!(doc.contains("call.mp3"));
        assert!(doc.ends_with("</html>"));
    }
}
