//! Configuration loading, validation, and management for Recallkit.
//!
//! Loads configuration from `~/.recallkit/config.toml` with environment
//! variable overrides. Validates all settings at load time.

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use logging::{LoggingConfig, init_tracing};

/// The root configuration structure.
///
/// Maps directly to `~/.recallkit/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Durable store connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Working memory (ephemeral cache) settings
    #[serde(default)]
    pub working_memory: WorkingMemoryConfig,

    /// Recall engine defaults
    #[serde(default)]
    pub recall: RecallConfig,

    /// Context window assembly settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Durable store (PostgreSQL + pgvector) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string; `None` means the in-memory store is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection before failing.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Dimensionality of stored embeddings (0 disables the check).
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Whether the `match_memories` SQL function is deployed.
    #[serde(default = "default_true")]
    pub native_search: bool,
}

fn default_max_connections() -> u32 {
    10
}
fn default_acquire_timeout_secs() -> u64 {
    5
}
fn default_embedding_dim() -> usize {
    1536
}
fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            embedding_dim: default_embedding_dim(),
            native_search: true,
        }
    }
}

/// Redact a connection string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &redact(&self.url))
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("embedding_dim", &self.embedding_dim)
            .field("native_search", &self.native_search)
            .finish()
    }
}

/// Working memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryConfig {
    /// Expiry applied when `set` is called without an explicit TTL.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Namespace prefix for cache keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_ttl_secs() -> u64 {
    7200
}
fn default_key_prefix() -> String {
    "wm".into()
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Recall engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default = "default_recall_limit")]
    pub default_limit: usize,

    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// Minimum number of candidates fetched for in-process ranking.
    /// `0` fetches exactly `limit` rows.
    #[serde(default = "default_candidate_pool")]
    pub fallback_candidate_pool: usize,
}

fn default_recall_limit() -> usize {
    10
}
fn default_threshold() -> f32 {
    0.7
}
fn default_candidate_pool() -> usize {
    200
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_limit: default_recall_limit(),
            default_threshold: default_threshold(),
            fallback_candidate_pool: default_candidate_pool(),
        }
    }
}

/// Context window assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Budget used when the caller does not pass one.
    #[serde(default = "default_token_budget")]
    pub default_token_budget: usize,

    /// Share of the post-working-memory budget reserved for recalled memories.
    #[serde(default = "default_recall_share")]
    pub recall_budget_share: f32,

    /// Number of memories requested from the recall engine.
    #[serde(default = "default_context_recall_limit")]
    pub recall_limit: usize,

    #[serde(default = "default_threshold")]
    pub recall_threshold: f32,

    /// Capacity of the background touch queue.
    #[serde(default = "default_touch_queue_capacity")]
    pub touch_queue_capacity: usize,
}

fn default_token_budget() -> usize {
    8192
}
fn default_recall_share() -> f32 {
    0.15
}
fn default_context_recall_limit() -> usize {
    5
}
fn default_touch_queue_capacity() -> usize {
    256
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_token_budget: default_token_budget(),
            recall_budget_share: default_recall_share(),
            recall_limit: default_context_recall_limit(),
            recall_threshold: default_threshold(),
            touch_queue_capacity: default_touch_queue_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.recallkit/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `RECALLKIT_DATABASE_URL`, then `DATABASE_URL`
    /// - `RECALLKIT_LOG_LEVEL`
    /// - `RECALLKIT_LOG_JSON`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("RECALLKIT_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            self.database.url = Some(url);
        }

        if let Some(level) = lookup("RECALLKIT_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(json) = lookup("RECALLKIT_LOG_JSON") {
            self.logging.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".recallkit")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.working_memory.default_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "working_memory.default_ttl_secs must be > 0".into(),
            ));
        }

        for (name, threshold) in [
            ("recall.default_threshold", self.recall.default_threshold),
            ("context.recall_threshold", self.context.recall_threshold),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.context.recall_budget_share) {
            return Err(ConfigError::ValidationError(
                "context.recall_budget_share must be between 0.0 and 1.0".into(),
            ));
        }

        if self.context.touch_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "context.touch_queue_capacity must be > 0".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
