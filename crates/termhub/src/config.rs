//! Configuration for the terminal multiplexer.
//!
//! TOML-based configuration with validated defaults. The default path is
//! `~/.config/termhub/config.toml`; everything falls back to sensible
//! defaults when the file is absent.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::{default_shell, ChannelKind};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("cols and rows must be nonzero, got {0}x{1}")]
    InvalidSize(u16, u16),

    #[error("max_input_queue must be between 1 and 65536, got {0}")]
    InvalidQueueDepth(usize),

    #[error("grace_period_ms must be between 100 and 60000, got {0}")]
    InvalidGracePeriod(u64),

    #[error("join_timeout_ms must be between 100 and 60000, got {0}")]
    InvalidJoinTimeout(u64),

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Session defaults.
    pub session: SessionConfig,

    /// Shutdown timing.
    pub shutdown: ShutdownConfig,

    /// Logging.
    pub log: LogConfig,
}

/// Defaults applied to newly created sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell launched when a session is created without a command.
    pub default_shell: String,

    /// Initial terminal width in columns.
    pub cols: u16,

    /// Initial terminal height in rows.
    pub rows: u16,

    /// Maximum number of pending input entries per session. Input sent
    /// while the queue is full is rejected.
    pub max_input_queue: usize,

    /// Which channel kind backs new sessions.
    pub channel: ChannelKind,
}

/// Timing bounds for session termination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for the child to exit after a termination request
    /// before escalating to a forceful kill, in milliseconds.
    pub grace_period_ms: u64,

    /// How long to wait for a session's I/O threads to stop before
    /// abandoning the join, in milliseconds.
    pub join_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            cols: 80,
            rows: 24,
            max_input_queue: 256,
            channel: ChannelKind::Pty,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 3000,
            join_timeout_ms: 2000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ShutdownConfig {
    /// Grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Join timeout as a [`Duration`].
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Config {
    /// Default configuration file path: `~/.config/termhub/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("termhub")
            .join("config.toml")
    }

    /// Loads configuration from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves configuration to the given path, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validates all fields, returning the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidSize(self.session.cols, self.session.rows));
        }
        if self.session.max_input_queue == 0 || self.session.max_input_queue > 65536 {
            return Err(ConfigError::InvalidQueueDepth(self.session.max_input_queue));
        }
        if !(100..=60000).contains(&self.shutdown.grace_period_ms) {
            return Err(ConfigError::InvalidGracePeriod(self.shutdown.grace_period_ms));
        }
        if !(100..=60000).contains(&self.shutdown.join_timeout_ms) {
            return Err(ConfigError::InvalidJoinTimeout(self.shutdown.join_timeout_ms));
        }
        if !VALID_LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }
        Ok(())
    }
}
