//! # Configuration
//!
//! Layered settings for the chat cache and its tooling. Values resolve in
//! order: built-in defaults, then a YAML or JSON file, then `TRADELOG_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/";

pub const ENV_LOG_LEVEL: &str = "TRADELOG_LOG_LEVEL";
pub const ENV_API_BASE_URL: &str = "TRADELOG_API_BASE_URL";
pub const ENV_DATA_DIR: &str = "TRADELOG_DATA_DIR";
pub const ENV_QUIESCENCE_DELAY_MS: &str = "TRADELOG_QUIESCENCE_DELAY_MS";
pub const ENV_STORAGE_BACKEND: &str = "TRADELOG_STORAGE_BACKEND";

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("Unsupported configuration format '{0}'. Use 'yaml' or 'json'.")]
    UnsupportedFormat(String),

    #[error("Invalid {var} value '{value}': {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Which durable store backs the cache on native targets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One JSON file per key under `data_dir`.
    #[default]
    File,
    /// Process memory only; nothing survives a restart.
    Memory,
}

impl TryFrom<&str> for StorageBackend {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            _ => Err("expected 'file' or 'memory'"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Overrides the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// The directory file-backed stores write to.
    #[cfg(not(target_arch = "wasm32"))]
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "tradelog", "tradelog").map_or_else(
                || PathBuf::from("./.tradelog"),
                |dirs| dirs.data_dir().join("chat-cache"),
            )
        })
    }
}

/// Tunables of the local cache itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Wait before the first remote write of a new local entry.
    pub quiescence_delay_ms: u64,
    /// Maximum distance between a remote `created_at` and a local capture
    /// time for the two to count as the same message. Wider windows merge
    /// more echoes but risk folding genuine repeats together.
    pub dedup_window_ms: u64,
    /// Content prefix length of the coarse dedup key. Shorter prefixes
    /// collapse more near-identical messages.
    pub dedup_prefix_chars: usize,
    /// Prefix of every storage key written by the cache.
    pub key_prefix: String,
    /// Scope marker that distinguishes session writes from message writes.
    pub session_scope: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quiescence_delay_ms: 120_000,
            dedup_window_ms: 10_000,
            dedup_prefix_chars: 50,
            key_prefix: "tradelog_chat_".to_string(),
            session_scope: "session".to_string(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn quiescence_delay(&self) -> Duration {
        Duration::from_millis(self.quiescence_delay_ms)
    }
}

/// Retry policy of the durable outbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutboxConfig {
    /// Attempts before an entry is parked as failed.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 5_000,
            max_backoff_ms: 300_000,
        }
    }
}

impl OutboxConfig {
    /// Delay before the retry that follows failed attempt number `attempts`.
    ///
    /// Doubles from `initial_backoff_ms` and saturates at `max_backoff_ms`.
    #[must_use]
    pub fn backoff_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the journal REST API.
    pub base_url: Url,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_BASE_URL).expect("default base URL should parse"),
            timeout_ms: 15_000,
        }
    }
}

/// The main configuration structure for the tradelog chat cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub outbox: OutboxConfig,
    pub remote: RemoteConfig,
}

impl Config {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a `.yaml`/`.yml` or `.json` file.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed, when an
    /// environment override is malformed, or when validation fails.
    pub fn load_config(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::with_defaults(),
        };

        config.apply_env_overrides()?;
        config.validate().map_err(ConfigError::Invalid)?;

        tracing::debug!(
            backend = ?config.storage.backend,
            quiescence_delay_ms = config.cache.quiescence_delay_ms,
            "configuration resolved"
        );
        Ok(config)
    }

    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => {
                serde_yml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
            }
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Ok(value) = env::var(ENV_API_BASE_URL) {
            self.remote.base_url = Url::parse(&value).map_err(|_| ConfigError::InvalidEnv {
                var: ENV_API_BASE_URL,
                value: value.clone(),
                reason: "must be an absolute URL",
            })?;
        }
        if let Ok(value) = env::var(ENV_DATA_DIR) {
            self.storage.data_dir = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var(ENV_QUIESCENCE_DELAY_MS) {
            self.cache.quiescence_delay_ms =
                value.parse().map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_QUIESCENCE_DELAY_MS,
                    value: value.clone(),
                    reason: "must be a whole number of milliseconds",
                })?;
        }
        if let Ok(value) = env::var(ENV_STORAGE_BACKEND) {
            self.storage.backend =
                StorageBackend::try_from(value.as_str()).map_err(|reason| {
                    ConfigError::InvalidEnv {
                        var: ENV_STORAGE_BACKEND,
                        value: value.clone(),
                        reason,
                    }
                })?;
        }
        Ok(())
    }

    /// Validate the complete configuration.
    ///
    /// # Errors
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.cache.dedup_prefix_chars == 0 {
            errors.push("cache.dedup_prefix_chars must be greater than 0".to_string());
        }
        if self.cache.key_prefix.is_empty() {
            errors.push("cache.key_prefix must not be empty".to_string());
        }
        if self.cache.session_scope.is_empty() {
            errors.push("cache.session_scope must not be empty".to_string());
        }
        if self.outbox.max_attempts == 0 {
            errors.push("outbox.max_attempts must be at least 1".to_string());
        }
        if self.outbox.initial_backoff_ms > self.outbox.max_backoff_ms {
            errors.push("outbox.initial_backoff_ms must not exceed outbox.max_backoff_ms".to_string());
        }
        if self.remote.base_url.cannot_be_a_base() {
            errors.push(format!(
                "remote.base_url cannot be used as a base: {}",
                self.remote.base_url
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
