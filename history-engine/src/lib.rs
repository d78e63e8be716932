//! Config History Engine
//!
//! Versioned backups of Home Assistant configuration: change detection by
//! content hash, per-item histories for YAML lists, directory snapshots,
//! retention, diffs and restore.

pub mod config;
pub mod diff;
pub mod extract;
pub mod fs;
pub mod hasher;
pub mod orchestrator;
pub mod retention;
pub mod settings;
pub mod snapshot;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use orchestrator::{BackupOrchestrator, ConfigMetadata, RunReport, SettingsUpdate};
pub use settings::{AppSettings, SettingsStore};
pub use utils::errors::{EngineError, ErrorKind};
pub type Result<T> = std::result::Result<T, EngineError>;
