use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::AppSettings;
use crate::fs::IoPolicy;
use crate::utils::errors::Result;

/// JSON-file backed settings document.
///
/// Readers get a cheap snapshot (`Arc`) of the current document; an update
/// swaps the whole document after it has been persisted.
pub struct SettingsStore {
    path: PathBuf,
    io: IoPolicy,
    current: RwLock<Arc<AppSettings>>,
}

impl SettingsStore {
    /// Load settings from `path`.
    ///
    /// A missing or unparseable file is not fatal: the defaults are used and
    /// a warning is logged.
    pub async fn load(path: impl Into<PathBuf>, io: IoPolicy) -> Self {
        let path = path.into();
        let settings = match io.read_optional(&path).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<AppSettings>(&bytes) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse settings file, using defaults");
                    AppSettings::default()
                }
            },
            Ok(None) => {
                tracing::warn!(path = %path.display(), "Settings file not found, using defaults");
                AppSettings::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Settings file unreadable, using defaults");
                AppSettings::default()
            }
        };

        tracing::info!(
            config_dir = %settings.home_assistant_config_dir.display(),
            backup_dir = %settings.backup_dir.display(),
            port = %settings.port,
            groups = settings.config_groups.len(),
            "Loaded settings"
        );

        Self::with_settings(path, io, settings)
    }

    pub fn with_settings(path: impl Into<PathBuf>, io: IoPolicy, settings: AppSettings) -> Self {
        Self {
            path: path.into(),
            io,
            current: RwLock::new(Arc::new(settings)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<AppSettings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Write `settings` to disk atomically without changing the in-memory copy.
    pub async fn persist(&self, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_vec_pretty(settings)?;
        self.io.write_atomic(&self.path, &json).await
    }

    /// Swap the in-memory document.
    pub fn replace(&self, settings: AppSettings) -> Arc<AppSettings> {
        let settings = Arc::new(settings);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::clone(&settings);
        settings
    }
}
