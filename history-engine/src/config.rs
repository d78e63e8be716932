//! Configuration management for the history engine.
//!
//! Tuning knobs are loaded from a TOML file; every field has a default so a
//! partial file (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineOptions,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Configs processed in parallel during a run
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Upper bound for a single filesystem step, in seconds
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,

    /// Delay before retrying a transient I/O failure, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Unchanged lines shown around each hunk
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    /// Largest side (in bytes) still rendered as a unified diff
    #[serde(default = "default_max_diff_bytes")]
    pub max_diff_bytes: usize,

    /// Largest LCS table (old lines x new lines) computed for a diff
    #[serde(default = "default_max_diff_cells")]
    pub max_diff_cells: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_context_lines() -> usize {
    3
}

fn default_max_diff_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_diff_cells() -> usize {
    10_000_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            io_timeout_secs: default_io_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            context_lines: default_context_lines(),
            max_diff_bytes: default_max_diff_bytes(),
            max_diff_cells: default_max_diff_cells(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineOptions {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
