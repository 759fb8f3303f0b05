use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::validation::DEFAULT_MAX_FILE_SIZE;

/// Configuration for the transcription and analysis pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote transcription service settings
    pub transcription: TranscriptionConfig,

    /// Remote analysis (LLM) service settings
    pub analysis: AnalysisConfig,

    /// Authentication settings
    pub auth: AuthConfig,

    /// HTTP server and worker pool settings
    pub server: ServerConfig,

    /// Per-request defaults
    pub pipeline: PipelineDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Base URL of the Whisper-compatible audio API (e.g. ".../v1/audio")
    pub api_url: Option<String>,

    /// API key for the transcription service
    pub api_key: Option<String>,

    /// Model to request
    pub model: String,

    /// Maximum attempts for a single upload
    pub max_retries: u32,

    /// Base delay for exponential backoff (seconds)
    pub backoff_base_secs: u64,

    /// Connection timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Full request timeout, covering the upload (seconds)
    pub request_timeout_secs: u64,

    /// Maximum accepted audio file size (bytes)
    pub max_file_size: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            model: "whisper-1".to_string(),
            max_retries: 3,
            backoff_base_secs: 1,
            connect_timeout_secs: 30,
            request_timeout_secs: 300,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Messages endpoint of the analysis API
    pub api_url: Option<String>,

    /// API key for the analysis service
    pub api_key: Option<String>,

    /// Model to request
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_url: Some("https://api.anthropic.com/v1/messages".to_string()),
            api_key: None,
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 4000,
            temperature: 0.3,
            timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret used to sign and verify bearer tokens
    pub jwt_secret: Option<String>,

    /// Token lifetime (minutes)
    pub jwt_expires_minutes: i64,

    /// Shared platform token used to verify login payload signatures
    pub platform_token: Option<String>,

    /// Principals allowed to use the pipeline, lower-cased. Empty denies all.
    pub allowed_principals: Vec<String>,

    /// Maximum accepted age of a login payload (seconds)
    pub login_max_age_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_expires_minutes: 60,
            platform_token: None,
            allowed_principals: Vec::new(),
            login_max_age_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Number of concurrent pipeline workers
    pub workers: usize,

    /// Maximum number of queued jobs before submissions are refused
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: num_cpus::get().min(4),
            queue_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDefaults {
    /// Language assumed when a request does not specify one
    pub language: String,

    /// Attach heuristic speaker labels by default
    pub speaker_labels: bool,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            language: "english".to_string(),
            speaker_labels: true,
        }
    }
}

impl Config {
    /// Load configuration: first TOML file found wins, then environment
    /// variables override individual fields. With no file present the
    /// defaults plus environment are used.
    pub fn load() -> Result<Self, PipelineError> {
        let config_paths = [
            "talklens.toml",
            "config/talklens.toml",
            "/etc/talklens/config.toml",
        ];

        let mut config = Self::default();
        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(parsed) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        config = parsed;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Build configuration from defaults plus environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override individual fields from environment variables.
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("WHISPER_API_URL") {
            self.transcription.api_url = Some(url);
        }
        if let Ok(key) = std::env::var("WHISPER_API_KEY") {
            self.transcription.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("WHISPER_MODEL") {
            self.transcription.model = model;
        }

        if let Ok(url) = std::env::var("CLAUDE_API_URL") {
            self.analysis.api_url = Some(url);
        }
        if let Ok(key) = std::env::var("CLAUDE_API_KEY") {
            self.analysis.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("CLAUDE_MODEL") {
            self.analysis.model = model;
        }

        if let Ok(secret) = std::env::var("JWT_SECRET_KEY") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            self.auth.platform_token = Some(token);
        }
        if let Ok(usernames) = std::env::var("ALLOWED_USERNAMES") {
            self.auth.allowed_principals = usernames
                .split(',')
                .map(|u| u.trim().to_lowercase())
                .filter(|u| !u.is_empty())
                .collect();
        }

        if let Ok(host) = std::env::var("TALKLENS_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("TALKLENS_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(workers) = std::env::var("TALKLENS_WORKERS") {
            if let Ok(workers) = workers.parse() {
                self.server.workers = workers;
            }
        }

        if let Ok(language) = std::env::var("DEFAULT_LANGUAGE") {
            self.pipeline.language = language;
        }
    }

    /// Validate settings that would otherwise fail deep inside the pipeline.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.server.workers == 0 {
            return Err(PipelineError::Configuration(
                "server.workers must be greater than 0".to_string(),
            ));
        }
        if self.server.queue_capacity == 0 {
            return Err(PipelineError::Configuration(
                "server.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.transcription.max_retries == 0 {
            return Err(PipelineError::Configuration(
                "transcription.max_retries must be greater than 0".to_string(),
            ));
        }
        if self.transcription.max_file_size == 0 {
            return Err(PipelineError::Configuration(
                "transcription.max_file_size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.analysis.temperature) {
            return Err(PipelineError::Configuration(
                "analysis.temperature must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.auth.jwt_expires_minutes <= 0 {
            return Err(PipelineError::Configuration(
                "auth.jwt_expires_minutes must be greater than 0".to_string(),
            ));
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Runtime configuration summary for startup logs. Secrets are reported
    /// only by presence.
    pub fn summary(&self) -> String {
        format!(
            "Pipeline Configuration:\n\
            - Transcription API: {}\n\
            - Analysis Model: {}\n\
            - Workers: {}\n\
            - Queue Capacity: {}\n\
            - Max File Size: {} MB\n\
            - Allowed Principals: {}\n\
            - Auth Configured: {}",
            self.transcription.api_url.as_deref().unwrap_or("(not set)"),
            self.analysis.model,
            self.server.workers,
            self.server.queue_capacity,
            self.transcription.max_file_size / (1024 * 1024),
            self.auth.allowed_principals.len(),
            self.auth.jwt_secret.is_some() && self.auth.platform_token.is_some(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transcription.model, "whisper-1");
        assert_eq!(config.transcription.max_retries, 3);
        assert_eq!(config.analysis.max_tokens, 4000);
        assert_eq!(config.auth.login_max_age_secs, 86400);
        assert!(config.auth.allowed_principals.is_empty());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = Config::default();
        config.server.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_temperature() {
        let mut config = Config::default();
        config.analysis.temperature = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [transcription]
            api_url = "https://whisper.example.com/v1/audio"
            api_key = "secret"

            [auth]
            allowed_principals = ["alice"]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.transcription.api_url.as_deref(),
            Some("https://whisper.example.com/v1/audio")
        );
        assert_eq!(config.transcription.model, "whisper-1");
        assert_eq!(config.auth.allowed_principals, vec!["alice".to_string()]);
        assert_eq!(config.server.port, 8000);
    }
}
