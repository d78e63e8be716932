use serde::Serialize;
use std::collections::BTreeMap;

use super::BackupOrchestrator;
use crate::diff::{BackupDiffResponse, Format, Version};
use crate::settings::{AppSettings, BackupType, TrackedConfig};
use crate::snapshot::TreeBundle;
use crate::store::{BackupInfo, BackupRecord};
use crate::utils::errors::{EngineError, Result};

/// Compare operand naming the live content.
pub const LIVE: &str = "current";
/// Compare operand naming the backup just before the other operand.
pub const PREVIOUS: &str = "previous";

/// One history as shown in the config listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMetadata {
    pub id: String,
    pub path: String,
    pub friendly_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hash: Option<String>,
    pub backup_count: usize,
    pub backups_size: u64,
    pub backup_type: BackupType,
}

impl BackupOrchestrator {
    /// Every history of every tracked config, by group name.
    ///
    /// Single-file and directory configs are listed even before their first
    /// backup.
    pub async fn list_configs(&self) -> Result<BTreeMap<String, Vec<ConfigMetadata>>> {
        let settings = self.settings();
        let store = self.store(&settings);
        let mut groups: BTreeMap<String, Vec<ConfigMetadata>> = BTreeMap::new();

        for group in &settings.config_groups {
            let entries = groups.entry(group.group_name.clone()).or_default();

            for config in &group.configs {
                let histories = store.histories(&config.path, config.backup_type).await?;

                if histories.is_empty() && config.backup_type != BackupType::Multiple {
                    entries.push(ConfigMetadata {
                        id: config.path.clone(),
                        path: config.path.clone(),
                        friendly_name: config.display_name().to_string(),
                        last_hash: None,
                        backup_count: 0,
                        backups_size: 0,
                        backup_type: config.backup_type,
                    });
                    continue;
                }

                for history in histories {
                    let records = store.list(&config.path, &history.id).await?;
                    let friendly_name = match config.backup_type {
                        BackupType::Multiple => history.friendly_name,
                        BackupType::Single | BackupType::Directory => config.display_name().to_string(),
                    };
                    entries.push(ConfigMetadata {
                        last_hash: history.last_hash.map(|h| h.to_string()),
                        backup_count: records.len(),
                        backups_size: records.iter().map(|r| r.size).sum(),
                        id: history.id,
                        path: config.path.clone(),
                        friendly_name,
                        backup_type: config.backup_type,
                    });
                }
            }

            entries.sort_by_key(|e| e.friendly_name.to_lowercase());
        }

        Ok(groups)
    }

    /// Backups of one history, oldest first.
    pub async fn list_backups(&self, path: &str, id: &str) -> Result<Vec<BackupInfo>> {
        let settings = self.settings();
        let records = self.store(&settings).list(path, id).await?;
        Ok(records.iter().map(BackupInfo::from).collect())
    }

    /// A backup as text. Directory snapshots are rendered as a file listing.
    pub async fn read_backup(&self, path: &str, id: &str, filename: &str) -> Result<String> {
        let settings = self.settings();
        let content = self.store(&settings).read(path, id, filename).await?;

        if self.backup_type_of(&settings, path) == Some(BackupType::Directory) {
            let bundle = TreeBundle::decode(&content)
                .map_err(|e| EngineError::content(filename, e.to_string()))?;
            return Ok(bundle.render());
        }
        Ok(String::from_utf8_lossy(&content).into_owned())
    }

    /// Diff `left` against `right`.
    ///
    /// Either side may be a backup filename or [`LIVE`]; `left` may also be
    /// [`PREVIOUS`], meaning the backup before `right` (none yields a
    /// first-backup response).
    pub async fn compare(&self, path: &str, id: &str, left: &str, right: &str) -> Result<BackupDiffResponse> {
        let settings = self.settings();
        let config = find_config(&settings, path)?;
        let store = self.store(&settings);
        let records = store.list(path, id).await?;

        let new = self.operand(&settings, config, id, right).await?;
        let old = if left == PREVIOUS {
            match previous_of(&records, right) {
                Some(record) => Some((
                    record.filename.clone(),
                    store.read(path, id, &record.filename).await?,
                )),
                None => None,
            }
        } else {
            Some(self.operand(&settings, config, id, left).await?)
        };

        let format = match config.backup_type {
            BackupType::Directory => Format::Bundle,
            BackupType::Single | BackupType::Multiple => Format::Plain,
        };
        let old_version = old.as_ref().map(|(label, content)| Version { label, content });
        let new_version = Version {
            label: &new.0,
            content: &new.1,
        };

        self.inner
            .diff
            .compare(old_version, new_version, format)
            .map_err(|e| EngineError::content(path, e.to_string()))
    }

    /// Label and stored bytes of a compare operand.
    async fn operand(
        &self,
        settings: &AppSettings,
        config: &TrackedConfig,
        id: &str,
        name: &str,
    ) -> Result<(String, Vec<u8>)> {
        if name == LIVE {
            let captures = self.hasher(settings).capture(config).await?;
            let capture = captures
                .into_iter()
                .find(|c| c.id == id)
                .ok_or_else(|| EngineError::not_found("Live item", format!("{}/{id}", config.path)))?;
            return Ok((LIVE.to_string(), capture.content));
        }
        let content = self.store(settings).read(&config.path, id, name).await?;
        Ok((name.to_string(), content))
    }

    pub async fn delete_backup(&self, path: &str, id: &str, filename: &str) -> Result<()> {
        let settings = self.settings();
        let store = self.store(&settings);
        let guard = store.lock(path).await?;
        store.delete(&guard, path, id, filename).await
    }

    pub async fn delete_all_backups(&self, path: &str, id: &str) -> Result<usize> {
        let settings = self.settings();
        let store = self.store(&settings);
        let guard = store.lock(path).await?;
        store.delete_all(&guard, path, id).await
    }

    fn backup_type_of(&self, settings: &AppSettings, path: &str) -> Option<BackupType> {
        settings.find(path).map(|c| c.backup_type)
    }
}

pub(super) fn find_config<'a>(settings: &'a AppSettings, path: &str) -> Result<&'a TrackedConfig> {
    settings
        .find(path)
        .ok_or_else(|| EngineError::not_found("Config", path))
}

/// The record right before `right`; for [`LIVE`] that is the newest one.
fn previous_of<'a>(records: &'a [BackupRecord], right: &str) -> Option<&'a BackupRecord> {
    if right == LIVE {
        return records.last();
    }
    let position = records.iter().position(|r| r.filename == right)?;
    position.checked_sub(1).map(|i| &records[i])
}
