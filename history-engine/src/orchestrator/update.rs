use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::BackupOrchestrator;
use crate::settings::{validate, AppSettings};
use crate::store::BackupStore;
use crate::utils::errors::Result;

/// Result of a successful settings update.
#[derive(Debug, Clone)]
pub struct SettingsUpdate {
    pub settings: Arc<AppSettings>,
    pub warnings: Vec<String>,
    /// The effective cron schedule differs from the previous one.
    pub schedule_changed: bool,
}

impl BackupOrchestrator {
    /// Validate, persist and activate a new settings document.
    ///
    /// Configs carrying a `previousPath` are renames: their backup history is
    /// moved along before the document is written. Histories of configs that
    /// simply disappear stay on disk and produce a warning. On any failure the
    /// previous document stays active and moved histories are moved back.
    pub async fn apply_settings(&self, mut new: AppSettings) -> Result<SettingsUpdate> {
        let _serial = self.inner.update.lock().await;

        let mut warnings = validate(&new)?;
        let old = self.settings();
        let store = self.store(&old);

        let renames = planned_renames(&old, &new);
        let new_paths: HashSet<&str> = new.configs().map(|(_, c)| c.path.as_str()).collect();
        for (_, config) in old.configs() {
            let renamed = renames.iter().any(|(from, _)| from == &config.path);
            if !renamed && !new_paths.contains(config.path.as_str()) {
                warnings.push(format!(
                    "config '{}' is no longer tracked; its backup history was kept",
                    config.path
                ));
            }
        }

        // every path involved in a rename stays locked until the new document is active
        let locked: BTreeSet<&str> = renames
            .iter()
            .flat_map(|(from, to)| [from.as_str(), to.as_str()])
            .collect();
        let mut guards = Vec::with_capacity(locked.len());
        for path in locked {
            guards.push(store.lock(path).await?);
        }

        let mut moved: Vec<(String, String)> = Vec::new();
        for (from, to) in &renames {
            if let Err(e) = store.rename_history(from, to).await {
                undo_renames(&store, &moved).await;
                return Err(e);
            }
            moved.push((from.clone(), to.clone()));
        }

        for group in &mut new.config_groups {
            for config in &mut group.configs {
                config.previous_path = None;
            }
        }

        if let Err(e) = self.inner.settings.persist(&new).await {
            undo_renames(&store, &moved).await;
            return Err(e);
        }

        let schedule_changed = old.schedule() != new.schedule();
        let settings = self.inner.settings.replace(new);
        drop(guards);

        for warning in &warnings {
            warn!(warning = %warning, "Settings updated with warning");
        }
        info!(
            groups = settings.config_groups.len(),
            renamed = moved.len(),
            schedule_changed,
            "Settings updated"
        );

        Ok(SettingsUpdate {
            settings,
            warnings,
            schedule_changed,
        })
    }
}

/// `(from, to)` pairs for configs whose path changed from one still known
/// to the current document.
fn planned_renames(old: &AppSettings, new: &AppSettings) -> Vec<(String, String)> {
    new.configs()
        .filter_map(|(_, config)| {
            let previous = config.previous_path.as_deref()?;
            (previous != config.path && old.find(previous).is_some())
                .then(|| (previous.to_string(), config.path.clone()))
        })
        .collect()
}

async fn undo_renames(store: &BackupStore, moved: &[(String, String)]) {
    for (from, to) in moved.iter().rev() {
        if let Err(e) = store.rename_history(to, from).await {
            error!(from = %to, to = %from, error = %e, "Failed to move backup history back");
        }
    }
}
