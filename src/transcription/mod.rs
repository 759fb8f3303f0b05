pub mod client;
pub mod diarization;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub use client::TranscriptionClient;

/// A contiguous span of transcribed speech.
///
/// Segments arrive ordered by `start`; they are not required to be contiguous
/// or non-overlapping (the upstream API may emit either), but `end >= start`
/// always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds
    #[serde(default)]
    pub start: f64,
    /// End time in seconds
    #[serde(default)]
    pub end: f64,
    /// Transcribed text
    pub text: String,
    /// Speaker label, attached by the diarization post-processor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Complete transcription result, created once per successful call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcription text
    pub text: String,
    /// Individual segments in chronological order
    pub segments: Vec<TranscriptSegment>,
    /// Detected language, when the API reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Remaining response fields, kept opaque
    #[serde(default)]
    pub raw: serde_json::Map<String, serde_json::Value>,
}

/// Timestamp detail level requested from the transcription API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampGranularity {
    Segment,
    Word,
}

impl TimestampGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segment => "segment",
            Self::Word => "word",
        }
    }
}

/// Per-call transcription options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeOptions {
    /// Language of the audio, as a name ("english") or ISO code ("en")
    pub language: String,
    /// Optional context prompt to improve accuracy
    pub prompt: Option<String>,
    /// Attach heuristic speaker labels to segments
    pub speaker_labels: bool,
    /// Use the translation endpoint (output in English)
    pub translate: bool,
    /// Timestamp detail levels to request
    pub timestamp_granularities: Vec<TimestampGranularity>,
    /// Minimum number of speakers to assume
    pub min_speakers: Option<u32>,
    /// Maximum number of speakers to assume
    pub max_speakers: Option<u32>,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language: "english".to_string(),
            prompt: None,
            speaker_labels: true,
            translate: false,
            timestamp_granularities: vec![TimestampGranularity::Segment],
            min_speakers: Some(1),
            max_speakers: Some(8),
        }
    }
}

impl TranscribeOptions {
    /// Validate option combinations before building a request.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.language.trim().is_empty() {
            return Err(PipelineError::validation(
                "language",
                "language must be a non-empty string",
            ));
        }

        if let Some(min) = self.min_speakers {
            if min < 1 {
                return Err(PipelineError::validation(
                    "min_speakers",
                    "min_speakers must be a positive integer",
                ));
            }
        }

        if let Some(max) = self.max_speakers {
            if max < 1 {
                return Err(PipelineError::validation(
                    "max_speakers",
                    "max_speakers must be a positive integer",
                ));
            }
        }

        if let (Some(min), Some(max)) = (self.min_speakers, self.max_speakers) {
            if min > max {
                return Err(PipelineError::validation(
                    "speaker_range",
                    "min_speakers cannot be greater than max_speakers",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(TranscribeOptions::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_language() {
        let opts = TranscribeOptions {
            language: "  ".to_string(),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_speaker_range() {
        let opts = TranscribeOptions {
            min_speakers: Some(5),
            max_speakers: Some(2),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_speakers() {
        let opts = TranscribeOptions {
            min_speakers: Some(0),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_granularity_wire_names() {
        assert_eq!(TimestampGranularity::Segment.as_str(), "segment");
        assert_eq!(TimestampGranularity::Word.as_str(), "word");
    }
}
