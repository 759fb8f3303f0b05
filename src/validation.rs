use tracing::debug;

use crate::error::PipelineError;

/// Audio/video container extensions accepted for upload.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm", "flac", "ogg", "oga", "opus", "3gp",
    "aac", "amr",
];

/// Default maximum upload size (100 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// An upload that passed all validation checks.
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub filename: String,
    pub extension: String,
    pub size: u64,
    pub content_type: &'static str,
}

/// Validate uploaded audio content before any network call.
///
/// Checks, in order: non-empty content, size limit, extension allow-list,
/// and that the MIME type derived from the extension is audio/video-prefixed.
/// Pure apart from a debug log on success.
pub fn validate(content: &[u8], filename: &str, max_size: u64) -> Result<ValidatedFile, PipelineError> {
    if content.is_empty() {
        return Err(PipelineError::validation("file_content", "file content is empty"));
    }

    let size = content.len() as u64;
    if size > max_size {
        let size_mb = size as f64 / (1024.0 * 1024.0);
        return Err(PipelineError::validation(
            "file_size",
            format!(
                "file too large: {:.1}MB (max: {}MB)",
                size_mb,
                max_size / (1024 * 1024)
            ),
        ));
    }

    let extension = file_extension(filename);
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(PipelineError::validation(
            "file_extension",
            format!(
                "unsupported file type: .{} (supported: {})",
                extension,
                SUPPORTED_EXTENSIONS.join(", ")
            ),
        ));
    }

    let content_type = content_type_for_extension(&extension);
    if !(content_type.starts_with("audio/") || content_type.starts_with("video/")) {
        return Err(PipelineError::validation(
            "mime_type",
            format!("not an audio/video MIME type: {}", content_type),
        ));
    }

    debug!("File validation passed: {} ({:.1}KB)", filename, size as f64 / 1024.0);

    Ok(ValidatedFile {
        filename: filename.to_string(),
        extension,
        size,
        content_type,
    })
}

/// Lower-cased extension without the leading dot; empty if none.
pub fn file_extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// MIME type for an audio file extension, defaulting to audio/mpeg.
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "mp3" | "mpga" | "mpeg" => "audio/mpeg",
        "mp4" | "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "webm" => "audio/webm",
        "3gp" => "audio/3gpp",
        "aac" => "audio/aac",
        "opus" => "audio/opus",
        "amr" => "audio/amr",
        _ => "audio/mpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn constraint(err: &PipelineError) -> &'static str {
        match err {
            PipelineError::Validation { constraint, .. } => constraint,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_accepts_valid_audio() {
        let file = validate(b"fake mp3 bytes", "meeting.mp3", DEFAULT_MAX_FILE_SIZE).unwrap();
        assert_eq!(file.extension, "mp3");
        assert_eq!(file.content_type, "audio/mpeg");
        assert_eq!(file.size, 14);
    }

    #[test]
    fn test_rejects_empty_content() {
        let err = validate(b"", "meeting.mp3", DEFAULT_MAX_FILE_SIZE).unwrap_err();
        assert_eq!(constraint(&err), "file_content");
    }

    #[test]
    fn test_rejects_oversized_content() {
        let content = vec![0u8; 11];
        let err = validate(&content, "meeting.wav", 10).unwrap_err();
        assert_eq!(constraint(&err), "file_size");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_rejects_unsupported_extension() {
        let err = validate(b"data", "notes.txt", DEFAULT_MAX_FILE_SIZE).unwrap_err();
        assert_eq!(constraint(&err), "file_extension");
        assert!(err.to_string().contains(".txt"));
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let file = validate(b"data", "CALL.FLAC", DEFAULT_MAX_FILE_SIZE).unwrap();
        assert_eq!(file.extension, "flac");
        assert_eq!(file.content_type, "audio/flac");
    }

    #[test]
    fn test_all_supported_extensions_accepted() {
        for ext in SUPPORTED_EXTENSIONS {
            let filename = format!("sample.{}", ext);
            assert!(
                validate(b"data", &filename, DEFAULT_MAX_FILE_SIZE).is_ok(),
                "extension {} should be accepted",
                ext
            );
        }
    }
}
