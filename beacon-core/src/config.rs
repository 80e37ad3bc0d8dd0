//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/beacon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/beacon/` (~/.config/beacon/)
//! - Data (event backup): `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
//! - State/Logs: `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Event buffer and collector endpoint
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily log files kept in the state directory before the oldest is removed
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    7
}

/// Event buffer configuration
///
/// ```toml
/// [buffer]
/// server_url = "https://collector.example.com/events"
/// cooldown_secs = 3.0
/// ```
#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    /// Collector endpoint that receives the POSTed batch
    pub server_url: Option<String>,

    /// Seconds to wait before each delivery attempt (debounce and retry interval)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// File name of the pending-event backup, relative to the data directory
    #[serde(default = "default_backup_file")]
    pub backup_file: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            cooldown_secs: default_cooldown_secs(),
            timeout_secs: default_timeout_secs(),
            backup_file: default_backup_file(),
        }
    }
}

fn default_cooldown_secs() -> f64 {
    3.0
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_backup_file() -> String {
    "BackupEvents.json".to_string()
}

impl BufferConfig {
    /// Check if the buffer has everything it needs to deliver events
    pub fn is_ready(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.server_url.as_deref() {
            None => {
                return Err(Error::Config("buffer.server_url is required".to_string()));
            }
            Some(url) if url.trim().is_empty() => {
                return Err(Error::Config(
                    "buffer.server_url must not be empty".to_string(),
                ));
            }
            Some(_) => {}
        }
        if !self.cooldown_secs.is_finite() || self.cooldown_secs < 0.0 {
            return Err(Error::Config(
                "buffer.cooldown_secs must be a non-negative number".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "buffer.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.backup_file.trim().is_empty() {
            return Err(Error::Config(
                "buffer.backup_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Cooldown as a [`Duration`]
    ///
    /// Invalid values collapse to zero; call [`validate`](Self::validate) first
    /// to reject them.
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs).unwrap_or(Duration::ZERO)
    }

    /// HTTP request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full path of the backup file inside the data directory
    pub fn backup_path(&self) -> PathBuf {
        Config::data_dir().join(&self.backup_file)
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/beacon/config.toml` (~/.config/beacon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("beacon").join("config.toml")
    }

    /// Returns the data directory path (holds the event backup)
    ///
    /// `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("beacon")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("beacon")
    }
}
