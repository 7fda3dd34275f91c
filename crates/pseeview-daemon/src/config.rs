//! Daemon configuration.
//!
//! Parses the TOML file that tells the daemon where the PSEE event log
//! lives, where to checkpoint its cursor, and where to bind the HTTP
//! query surface. Every key has a default, so an empty file (or no file
//! at all) yields a runnable configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pseeview_core::consumer::{ConsumerConfig, DEFAULT_CURSOR_KEY};
use pseeview_core::source::BATCH_SIZE;
use serde::Deserialize;

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Event pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, contains unknown keys, or
    /// fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value-level constraints the TOML grammar cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "pipeline.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::Validation(
                "pipeline.batch_size must be at least 1".to_string(),
            ));
        }
        if self.pipeline.cursor_key.is_empty() {
            return Err(ConfigError::Validation(
                "pipeline.cursor_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the query surface binds to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Event pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Path to the PSEE event log database (opened read-only).
    #[serde(default = "default_event_db")]
    pub event_db: PathBuf,

    /// Path to the cursor checkpoint database (created if missing).
    #[serde(default = "default_cursor_db")]
    pub cursor_db: PathBuf,

    /// Delay between polls of the event log, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum events fetched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Cursor-store key for this daemon's position. Change it only when
    /// pointing several daemons at one checkpoint database.
    #[serde(default = "default_cursor_key")]
    pub cursor_key: String,
}

impl PipelineConfig {
    /// Translates the file-level settings into consumer tuning.
    #[must_use]
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_batch_size(self.batch_size)
            .with_cursor_key(self.cursor_key.clone())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_db: default_event_db(),
            cursor_db: default_cursor_db(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            cursor_key: default_cursor_key(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_event_db() -> PathBuf {
    PathBuf::from("/var/lib/pseeview/events.db")
}

fn default_cursor_db() -> PathBuf {
    PathBuf::from("/var/lib/pseeview/cursor.db")
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

const fn default_batch_size() -> usize {
    BATCH_SIZE
}

fn default_cursor_key() -> String {
    DEFAULT_CURSOR_KEY.to_string()
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
