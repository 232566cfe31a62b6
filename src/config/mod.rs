//! Configuration management for rowstream
//!
//! Configuration is read from a TOML file and then overridden by
//! command-line arguments. Precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Configuration file
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP host configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Export pipeline configuration
    #[serde(default)]
    pub export: ExportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path serving the export
    #[serde(default = "default_route")]
    pub route: String,
}

/// Export pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Rows per batch when the request does not say
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: u64,

    /// Rows to export when the request does not say
    #[serde(default = "default_total_rows")]
    pub default_total_rows: u64,

    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    #[serde(default = "default_min_total_rows")]
    pub min_total_rows: u64,

    #[serde(default = "default_max_total_rows")]
    pub max_total_rows: u64,

    /// Simulated I/O latency per batch, in milliseconds
    #[serde(default = "default_batch_latency_ms")]
    pub batch_latency_ms: u64,

    /// Prefix of the generated attachment filename
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,

    /// Upper bound (inclusive) of the generated `value` column
    #[serde(default = "default_max_value")]
    pub max_value: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_route() -> String {
    "/export-report".to_string()
}

fn default_chunk_size() -> u64 {
    10_000
}

fn default_total_rows() -> u64 {
    100_000
}

fn default_min_chunk_size() -> u64 {
    500
}

fn default_max_chunk_size() -> u64 {
    50_000
}

fn default_min_total_rows() -> u64 {
    1
}

fn default_max_total_rows() -> u64 {
    1_000_000
}

fn default_batch_latency_ms() -> u64 {
    10
}

fn default_filename_prefix() -> String {
    "report".to_string()
}

fn default_max_value() -> i64 {
    10_000
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            route: default_route(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: default_chunk_size(),
            default_total_rows: default_total_rows(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            min_total_rows: default_min_total_rows(),
            max_total_rows: default_max_total_rows(),
            batch_latency_ms: default_batch_latency_ms(),
            filename_prefix: default_filename_prefix(),
            max_value: default_max_value(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// When `path` is `None` the default location is tried and a missing
    /// file yields the defaults. An explicit path must exist.
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigError::FileNotFound(path.display().to_string()).into());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rowstream")
            .join("config.toml")
    }

    /// Validate the configuration
    ///
    /// Bounds must be ordered and non-zero, and both defaults must lie
    /// inside them.
    pub fn validate(&self) -> Result<()> {
        let e = &self.export;

        if e.min_chunk_size == 0 || e.min_chunk_size > e.max_chunk_size {
            return Err(invalid("export.min_chunk_size", e.min_chunk_size));
        }
        if e.min_total_rows == 0 || e.min_total_rows > e.max_total_rows {
            return Err(invalid("export.min_total_rows", e.min_total_rows));
        }
        if !(e.min_chunk_size..=e.max_chunk_size).contains(&e.default_chunk_size) {
            return Err(invalid("export.default_chunk_size", e.default_chunk_size));
        }
        if !(e.min_total_rows..=e.max_total_rows).contains(&e.default_total_rows) {
            return Err(invalid("export.default_total_rows", e.default_total_rows));
        }
        if e.max_value < 0 {
            return Err(invalid("export.max_value", e.max_value));
        }
        if e.filename_prefix.is_empty()
            || !e
                .filename_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("export.filename_prefix", &e.filename_prefix));
        }
        if !self.server.route.starts_with('/') {
            return Err(invalid("server.route", &self.server.route));
        }

        Ok(())
    }

    /// Simulated per-batch latency as Duration
    pub fn batch_latency(&self) -> Duration {
        Duration::from_millis(self.export.batch_latency_ms)
    }
}

fn invalid(field: &str, value: impl ToString) -> crate::error::RowstreamError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
