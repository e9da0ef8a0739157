//! Runtime configuration
//!
//! Every tunable the engine exposes lives here. Values come from
//! `Default` and may be overridden per-key through `SCRIBED_*`
//! environment variables; provider endpoints and credentials are
//! environment-only.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Top-level runtime configuration, one field per subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket server settings
    pub server: ServerConfig,

    /// SQLite location and pool sizing
    pub database: DatabaseConfig,

    /// On-disk audio storage
    pub storage: StorageConfig,

    /// Job queue and worker settings
    pub processing: ProcessingConfig,

    /// Live streaming settings
    pub stream: StreamConfig,

    /// Inference provider endpoints and models
    pub provider: ProviderConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener
    pub bind: String,
}

/// SQLite settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Where the SQLite file lives
    pub path: PathBuf,

    /// Pool size cap
    pub max_connections: u32,
}

/// On-disk storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one audio file per submission
    pub uploads_dir: PathBuf,

    /// Upload ceiling enforced by the ingest surface
    pub max_file_size_bytes: u64,
}

/// Job queue and worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Worker polling period in milliseconds
    pub poll_interval_ms: u64,

    /// Stuck-job scan cadence in milliseconds
    pub stuck_check_interval_ms: u64,

    /// Default per-job timeout in seconds
    pub default_job_timeout_seconds: i64,
}

/// Live streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Maximum number of concurrently attached viewers
    pub max_viewers: usize,

    /// Minimum word count before a chunk is scheduled for analysis.
    /// Zero analyzes every chunk.
    pub min_words_for_analysis: i64,

    /// Silence threshold the STT backend uses to close an utterance
    pub utterance_end_ms: u64,

    /// Audio capture rate in Hz (16-bit mono PCM)
    pub sample_rate_hz: u32,
}

/// Inference provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the local LLM daemon (Ollama-compatible API)
    pub local_base_url: String,

    /// Transcription endpoint of the local whisper server
    pub transcribe_url: String,

    /// Model tag used for summarization and chunk analysis
    pub summarize_model: String,

    /// Model tag the transcription server must have loaded
    pub transcribe_model: String,

    /// Streaming STT WebSocket endpoint (None disables live sessions)
    pub stt_ws_url: Option<String>,

    /// API key for the STT endpoint, if it requires one
    pub stt_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:8200".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("data/scribed.db"),
                max_connections: 10,
            },
            storage: StorageConfig {
                uploads_dir: PathBuf::from("data/uploads"),
                max_file_size_bytes: 100 * 1024 * 1024,
            },
            processing: ProcessingConfig {
                poll_interval_ms: 2000,
                stuck_check_interval_ms: 30_000,
                default_job_timeout_seconds: 300,
            },
            stream: StreamConfig {
                max_viewers: 50,
                min_words_for_analysis: 0,
                utterance_end_ms: 1500,
                sample_rate_hz: 16_000,
            },
            provider: ProviderConfig {
                local_base_url: "http://127.0.0.1:11434".to_string(),
                transcribe_url: "http://127.0.0.1:8090/transcribe".to_string(),
                summarize_model: "llama3.1:8b".to_string(),
                transcribe_model: "whisper-base".to_string(),
                stt_ws_url: None,
                stt_api_key: None,
            },
        }
    }
}

impl Config {
    /// Build a configuration from defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(bind) = env_string("SCRIBED_BIND") {
            config.server.bind = bind;
        }
        if let Some(path) = env_string("SCRIBED_DB_PATH") {
            config.database.path = PathBuf::from(path);
        }
        if let Some(dir) = env_string("SCRIBED_UPLOADS_DIR") {
            config.storage.uploads_dir = PathBuf::from(dir);
        }

        env_parse("SCRIBED_MAX_FILE_SIZE_BYTES", &mut config.storage.max_file_size_bytes);
        env_parse("SCRIBED_POLL_INTERVAL_MS", &mut config.processing.poll_interval_ms);
        env_parse(
            "SCRIBED_STUCK_CHECK_INTERVAL_MS",
            &mut config.processing.stuck_check_interval_ms,
        );
        env_parse(
            "SCRIBED_JOB_TIMEOUT_SECONDS",
            &mut config.processing.default_job_timeout_seconds,
        );
        env_parse("SCRIBED_MAX_VIEWERS", &mut config.stream.max_viewers);
        env_parse(
            "SCRIBED_MIN_WORDS_FOR_ANALYSIS",
            &mut config.stream.min_words_for_analysis,
        );
        env_parse("SCRIBED_UTTERANCE_END_MS", &mut config.stream.utterance_end_ms);
        env_parse("SCRIBED_SAMPLE_RATE_HZ", &mut config.stream.sample_rate_hz);

        if let Some(url) = env_string("SCRIBED_LOCAL_BASE_URL") {
            config.provider.local_base_url = url;
        }
        if let Some(url) = env_string("SCRIBED_TRANSCRIBE_URL") {
            config.provider.transcribe_url = url;
        }
        if let Some(model) = env_string("SCRIBED_SUMMARIZE_MODEL") {
            config.provider.summarize_model = model;
        }
        if let Some(model) = env_string("SCRIBED_TRANSCRIBE_MODEL") {
            config.provider.transcribe_model = model;
        }
        config.provider.stt_ws_url = env_string("SCRIBED_STT_WS_URL").or(config.provider.stt_ws_url);
        config.provider.stt_api_key =
            env_string("SCRIBED_STT_API_KEY").or(config.provider.stt_api_key);

        config
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(Error::invalid_input("max_connections must be greater than 0"));
        }
        if self.processing.poll_interval_ms == 0 {
            return Err(Error::invalid_input("poll_interval_ms must be greater than 0"));
        }
        if self.processing.default_job_timeout_seconds <= 0 {
            return Err(Error::invalid_input(
                "default_job_timeout_seconds must be greater than 0",
            ));
        }
        if self.stream.max_viewers == 0 {
            return Err(Error::invalid_input("max_viewers must be greater than 0"));
        }
        if self.stream.sample_rate_hz == 0 {
            return Err(Error::invalid_input("sample_rate_hz must be greater than 0"));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str, slot: &mut T) {
    if let Some(raw) = env_string(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!("ignoring unparseable {}={}", key, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.processing.poll_interval_ms, 2000);
        assert_eq!(config.processing.stuck_check_interval_ms, 30_000);
        assert_eq!(config.processing.default_job_timeout_seconds, 300);
        assert_eq!(config.stream.max_viewers, 50);
        assert_eq!(config.stream.min_words_for_analysis, 0);
        assert_eq!(config.stream.utterance_end_ms, 1500);
        assert_eq!(config.stream.sample_rate_hz, 16_000);
        assert_eq!(config.storage.max_file_size_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = Config::default();
        config.processing.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }
}
