use std::collections::BTreeSet;
use std::path::{Component, Path};
use tracing::info;

use super::read::find_config;
use super::BackupOrchestrator;
use crate::extract;
use crate::fs::{walk_directory, Access};
use crate::settings::{BackupType, TrackedConfig};
use crate::snapshot::TreeBundle;
use crate::utils::errors::{EngineError, Result};

impl BackupOrchestrator {
    /// Write a stored backup back to its live location.
    ///
    /// A list item replaces only its own entry; a directory snapshot replaces
    /// every file the config's filter covers. Returns a message naming the
    /// restored path.
    pub async fn restore(&self, path: &str, id: &str, filename: &str) -> Result<String> {
        let settings = self.settings();
        let config = find_config(&settings, path)?;
        let store = self.store(&settings);
        let _guard = store.lock(path).await?;

        let content = store.read(path, id, filename).await?;
        let live = config.live_path(&settings.home_assistant_config_dir);

        match config.backup_type {
            BackupType::Single => self.inner.io.write_atomic(&live, &content).await?,
            BackupType::Multiple => self.restore_item(config, &live, id, &content).await?,
            BackupType::Directory => self.restore_tree(config, &live, &content).await?,
        }

        info!(path = %path, id = %id, filename = %filename, live = %live.display(), "Restored backup");
        Ok(format!("Successfully restored backup to {}", live.display()))
    }

    async fn restore_item(&self, config: &TrackedConfig, live: &Path, id: &str, content: &[u8]) -> Result<()> {
        let item = std::str::from_utf8(content)
            .map_err(|_| EngineError::content(live, "backup is not valid UTF-8"))?;
        let current = match self.inner.io.read_optional(live).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|_| EngineError::content(live, "file is not valid UTF-8"))?,
            None => String::new(),
        };

        let id_node = config.id_node.as_deref().unwrap_or("id");
        let merged = extract::replace_item(&current, id_node, id, item)
            .map_err(|e| EngineError::content(live, e.to_string()))?;
        self.inner.io.write_atomic(live, merged.as_bytes()).await
    }

    async fn restore_tree(&self, config: &TrackedConfig, live: &Path, content: &[u8]) -> Result<()> {
        let bundle = TreeBundle::decode(content).map_err(|e| EngineError::content(live, e.to_string()))?;
        for entry in &bundle.entries {
            if !is_contained(&entry.path) {
                return Err(EngineError::content(
                    live,
                    format!("snapshot entry escapes the directory: {}", entry.path),
                ));
            }
        }

        let filter = config
            .filter()
            .map_err(|e| EngineError::Validation(format!("invalid file pattern: {e}")))?;
        let walk_root = live.to_path_buf();
        let existing = self
            .inner
            .io
            .blocking(Access::Read, live, move || {
                if !walk_root.is_dir() {
                    return Ok(Vec::new());
                }
                walk_directory(&walk_root, &filter)
            })
            .await?;

        for entry in &bundle.entries {
            let target = live.join(&entry.path);
            if let Some(parent) = target.parent() {
                self.inner.io.create_dir_all(parent).await?;
            }
            self.inner.io.write_atomic(&target, &entry.content).await?;
        }

        let kept: BTreeSet<&str> = bundle.entries.iter().map(|e| e.path.as_str()).collect();
        for file in existing {
            if !kept.contains(file.relative_path.as_str()) {
                self.inner.io.remove_file(&file.path).await?;
            }
        }
        Ok(())
    }
}

/// Whether a snapshot entry path stays inside the restored directory.
fn is_contained(relative: &str) -> bool {
    let path = Path::new(relative);
    !relative.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}
