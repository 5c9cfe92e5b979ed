//! Configuration management for Campfire
//!
//! All runtime knobs come from the environment with sensible offline-first
//! defaults. `Config::from_env` never fails on a missing variable; it fails
//! only when a variable is present but unparseable. `validate` performs the
//! cross-field checks that must hold before the runtime starts.

use crate::error::{CampfireError, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PROVIDER_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_MODEL_ID: &str = "gpt-oss:20b";
const DEFAULT_EMBEDDING_MODEL_ID: &str = "all-minilm";
const DEFAULT_EMBEDDING_DIM: usize = 384;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

/// Top-level runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding `app.db` and `rag_cache/`
    pub data_root: PathBuf,
    /// Database path; defaults to `data_root/app.db`
    pub db_path: PathBuf,
    /// OpenAI-compatible provider endpoint
    pub provider_base_url: String,
    /// API key forwarded to the provider (most local providers ignore it)
    pub provider_api_key: String,
    /// Fallback model id when the provider cannot be reached
    pub default_model_id: String,
    /// Identifier sent to the embeddings endpoint
    pub embedding_model_id: String,
    /// Embedding dimensionality; cached entries with another dim are ignored
    pub embedding_dim: usize,
    /// Ingestion limits
    pub ingest: IngestLimits,
    /// Chat turn limits
    pub turn: TurnLimits,
    /// Directory the `list_directory` tool is confined to
    pub repo_root: PathBuf,
    /// Address the HTTP shim binds to
    pub bind_addr: String,
}

/// Size and time limits for context ingestion
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    /// Maximum uploaded file size in bytes
    pub max_upload_bytes: u64,
    /// Maximum URL body size in bytes
    pub max_url_bytes: u64,
    /// Connect and read timeout for URL fetches
    pub url_timeout: Duration,
    /// Maximum redirects followed on a URL fetch
    pub max_redirects: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            max_url_bytes: 2 * 1024 * 1024,
            url_timeout: Duration::from_secs(10),
            max_redirects: 3,
        }
    }
}

/// Limits applied to a single chat turn
#[derive(Debug, Clone, Copy)]
pub struct TurnLimits {
    /// Maximum provider completions (rounds) per turn
    pub max_tool_rounds: usize,
    /// Maximum tool calls executed across all rounds of a turn
    pub max_total_tool_calls: usize,
    /// Wall-clock limit for a single tool call
    pub tool_call_timeout: Duration,
    /// Wall-clock limit for the whole turn
    pub turn_timeout: Duration,
    /// Bound on the outbound event queue (back-pressure)
    pub event_queue_capacity: usize,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_tool_rounds: 4,
            max_total_tool_calls: 15,
            tool_call_timeout: Duration::from_secs(30),
            turn_timeout: Duration::from_secs(600),
            event_queue_capacity: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_root = PathBuf::from("./data");
        Self {
            db_path: data_root.join("app.db"),
            data_root,
            provider_base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            provider_api_key: "sk-no-key".to_string(),
            default_model_id: DEFAULT_MODEL_ID.to_string(),
            embedding_model_id: DEFAULT_EMBEDDING_MODEL_ID.to_string(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            ingest: IngestLimits::default(),
            turn: TurnLimits::default(),
            repo_root: PathBuf::from("."),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// Missing variables fall back to defaults; present-but-invalid values
    /// are configuration errors.
    ///
    /// # Errors
    ///
    /// Returns `CampfireError::Config` when a numeric variable fails to
    /// parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(root) = std::env::var("DATA_ROOT") {
            config.data_root = PathBuf::from(&root);
            config.db_path = config.data_root.join("app.db");
        }
        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("PROVIDER_BASE_URL") {
            config.provider_base_url = url;
        }
        if let Ok(key) = std::env::var("PROVIDER_API_KEY") {
            config.provider_api_key = key;
        }
        if let Ok(model) = std::env::var("DEFAULT_MODEL_ID") {
            config.default_model_id = model;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL_ID") {
            config.embedding_model_id = model;
        }
        config.embedding_dim = parse_env("EMBEDDING_DIM", config.embedding_dim)?;

        config.ingest.max_upload_bytes =
            parse_env("MAX_UPLOAD_BYTES", config.ingest.max_upload_bytes)?;
        config.ingest.max_url_bytes = parse_env("MAX_URL_BYTES", config.ingest.max_url_bytes)?;
        config.ingest.url_timeout = Duration::from_secs(parse_env(
            "URL_TIMEOUT_SECONDS",
            config.ingest.url_timeout.as_secs(),
        )?);
        config.ingest.max_redirects = parse_env("MAX_REDIRECTS", config.ingest.max_redirects)?;

        config.turn.max_tool_rounds = parse_env("MAX_TOOL_ROUNDS", config.turn.max_tool_rounds)?;
        config.turn.max_total_tool_calls =
            parse_env("MAX_TOTAL_TOOL_CALLS", config.turn.max_total_tool_calls)?;
        config.turn.tool_call_timeout = Duration::from_secs(parse_env(
            "TOOL_CALL_TIMEOUT_SECONDS",
            config.turn.tool_call_timeout.as_secs(),
        )?);
        config.turn.turn_timeout = Duration::from_secs(parse_env(
            "TURN_TIMEOUT_SECONDS",
            config.turn.turn_timeout.as_secs(),
        )?);
        config.turn.event_queue_capacity =
            parse_env("EVENT_QUEUE_CAPACITY", config.turn.event_queue_capacity)?;

        if let Ok(root) = std::env::var("REPO_ROOT") {
            config.repo_root = PathBuf::from(root);
        }
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }

        Ok(config)
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `CampfireError::Config` when a limit is zero, the provider
    /// URL is not http(s), or the repo root does not exist.
    pub fn validate(&self) -> Result<()> {
        if self.turn.max_tool_rounds == 0 {
            return Err(
                CampfireError::Config("MAX_TOOL_ROUNDS must be greater than 0".to_string()).into(),
            );
        }
        if self.turn.event_queue_capacity == 0 {
            return Err(CampfireError::Config(
                "EVENT_QUEUE_CAPACITY must be greater than 0".to_string(),
            )
            .into());
        }
        if self.embedding_dim == 0 {
            return Err(
                CampfireError::Config("EMBEDDING_DIM must be greater than 0".to_string()).into(),
            );
        }
        if !self.provider_base_url.starts_with("http://")
            && !self.provider_base_url.starts_with("https://")
        {
            return Err(CampfireError::Config(format!(
                "PROVIDER_BASE_URL must be an http(s) URL, got: {}",
                self.provider_base_url
            ))
            .into());
        }
        if !self.repo_root.exists() {
            return Err(CampfireError::Config(format!(
                "REPO_ROOT does not exist: {}",
                self.repo_root.display()
            ))
            .into());
        }
        Ok(())
    }

    /// Directory holding content-addressed retrieval cache entries
    pub fn rag_cache_dir(&self) -> PathBuf {
        self.data_root.join("rag_cache")
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            CampfireError::Config(format!("{} has invalid value: {}", name, raw)).into()
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data_root, PathBuf::from("./data"));
        assert_eq!(config.db_path, PathBuf::from("./data/app.db"));
        assert_eq!(config.provider_base_url, "http://localhost:11434/v1");
        assert_eq!(config.embedding_dim, 384);
        assert_eq!(config.ingest.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.ingest.max_url_bytes, 2 * 1024 * 1024);
        assert_eq!(config.ingest.max_redirects, 3);
        assert_eq!(config.turn.max_tool_rounds, 4);
        assert_eq!(config.turn.max_total_tool_calls, 15);
        assert_eq!(config.turn.event_queue_capacity, 256);
    }

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_rounds() {
        let mut config = Config::default();
        config.turn.max_tool_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_provider_url() {
        let config = Config {
            provider_base_url: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_repo_root() {
        let config = Config {
            repo_root: PathBuf::from("/definitely/not/a/real/path"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rag_cache_dir() {
        let config = Config::default();
        assert_eq!(config.rag_cache_dir(), PathBuf::from("./data/rag_cache"));
    }

    #[test]
    #[serial]
    fn test_from_env_respects_overrides() {
        std::env::set_var("DATA_ROOT", "/tmp/campfire-test");
        std::env::set_var("MAX_TOOL_ROUNDS", "7");
        std::env::set_var("MAX_URL_BYTES", "1024");

        let config = Config::from_env().unwrap();
        assert_eq!(config.data_root, PathBuf::from("/tmp/campfire-test"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/campfire-test/app.db"));
        assert_eq!(config.turn.max_tool_rounds, 7);
        assert_eq!(config.ingest.max_url_bytes, 1024);

        std::env::remove_var("DATA_ROOT");
        std::env::remove_var("MAX_TOOL_ROUNDS");
        std::env::remove_var("MAX_URL_BYTES");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unparseable() {
        std::env::set_var("MAX_TOOL_ROUNDS", "lots");
        let result = Config::from_env();
        std::env::remove_var("MAX_TOOL_ROUNDS");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_db_path_override_wins_over_data_root() {
        std::env::set_var("DATA_ROOT", "/tmp/campfire-a");
        std::env::set_var("DB_PATH", "/tmp/elsewhere/app.db");

        let config = Config::from_env().unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/elsewhere/app.db"));
        assert_eq!(config.data_root, PathBuf::from("/tmp/campfire-a"));

        std::env::remove_var("DATA_ROOT");
        std::env::remove_var("DB_PATH");
    }
}
