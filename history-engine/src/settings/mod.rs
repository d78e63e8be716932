//! Settings document: what is tracked, where backups live, how long they stay.
//!
//! The document is JSON with camelCase keys. Missing fields fall back to the
//! built-in defaults.

pub mod store;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::fs::PathFilter;
use crate::retention::RetentionLimits;

pub use store::SettingsStore;
pub use validate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Single,
    Multiple,
    Directory,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupType::Single => "single",
            BackupType::Multiple => "multiple",
            BackupType::Directory => "directory",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedConfig {
    #[serde(default)]
    pub name: String,

    /// Relative to the Home Assistant config dir
    pub path: String,

    pub backup_type: BackupType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backups: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backup_age_days: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_node: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name_node: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_file_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_file_patterns: Vec<String>,

    /// Request-only: the path this config was tracked under before an edit.
    #[serde(default, skip_serializing)]
    pub previous_path: Option<String>,
}

impl TrackedConfig {
    pub fn single(name: &str, path: &str) -> Self {
        Self::new(name, path, BackupType::Single)
    }

    pub fn multiple(name: &str, path: &str, id_node: &str, friendly_name_node: &str) -> Self {
        Self {
            id_node: Some(id_node.to_string()),
            friendly_name_node: Some(friendly_name_node.to_string()),
            ..Self::new(name, path, BackupType::Multiple)
        }
    }

    pub fn directory(name: &str, path: &str, include: &[&str], exclude: &[&str]) -> Self {
        Self {
            include_file_patterns: include.iter().map(|s| s.to_string()).collect(),
            exclude_file_patterns: exclude.iter().map(|s| s.to_string()).collect(),
            ..Self::new(name, path, BackupType::Directory)
        }
    }

    fn new(name: &str, path: &str, backup_type: BackupType) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            backup_type,
            max_backups: None,
            max_backup_age_days: None,
            id_node: None,
            friendly_name_node: None,
            include_file_patterns: Vec::new(),
            exclude_file_patterns: Vec::new(),
            previous_path: None,
        }
    }

    /// Label shown for single-file and directory histories.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.path
        } else {
            &self.name
        }
    }

    pub fn filter(&self) -> Result<PathFilter, globset::Error> {
        PathFilter::new(&self.include_file_patterns, &self.exclude_file_patterns)
    }

    /// Live location of this config under `config_root`.
    pub fn live_path(&self, config_root: &Path) -> PathBuf {
        let path = Path::new(&self.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            config_root.join(path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigGroup {
    pub group_name: String,
    #[serde(default)]
    pub configs: Vec<TrackedConfig>,
}

impl ConfigGroup {
    pub fn new(group_name: &str, configs: Vec<TrackedConfig>) -> Self {
        Self {
            group_name: group_name.to_string(),
            configs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub home_assistant_config_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub port: String,
    pub cron_schedule: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_backups: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_backup_age_days: Option<i64>,

    pub config_groups: Vec<ConfigGroup>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            home_assistant_config_dir: PathBuf::from("/homeassistant"),
            backup_dir: PathBuf::from("/data/backups"),
            port: ":40613".to_string(),
            cron_schedule: None,
            default_max_backups: None,
            default_max_backup_age_days: None,
            config_groups: default_groups(),
        }
    }
}

fn default_groups() -> Vec<ConfigGroup> {
    vec![
        ConfigGroup::new(
            "Core Home Assistant",
            vec![
                TrackedConfig::single("Configuration", "configuration.yaml"),
                TrackedConfig::directory(
                    "Storage",
                    ".storage",
                    &[
                        "core.*",
                        "frontend.*",
                        "person",
                        "lovelace.*",
                        "lovelace_dashboards",
                        "energy",
                        "counter.*",
                        "input_*",
                        "schedule",
                        "timer",
                    ],
                    &[
                        "core.analytics",
                        "core.config_entries",
                        "core.restore_state",
                        "core.device_registry",
                        "core.entity_registry",
                        "core.uuid",
                    ],
                ),
            ],
        ),
        ConfigGroup::new(
            "Automations",
            vec![TrackedConfig::multiple(
                "Automations",
                "automations.yaml",
                "id",
                "alias",
            )],
        ),
        ConfigGroup::new(
            "Scenes",
            vec![TrackedConfig::multiple("Scenes", "scenes.yaml", "id", "name")],
        ),
        ConfigGroup::new(
            "ESP Home",
            vec![TrackedConfig::directory(
                "ESP Home",
                "esphome",
                &["*.yaml"],
                &["secrets.yaml"],
            )],
        ),
    ]
}

impl AppSettings {
    pub fn configs(&self) -> impl Iterator<Item = (&ConfigGroup, &TrackedConfig)> {
        self.config_groups
            .iter()
            .flat_map(|g| g.configs.iter().map(move |c| (g, c)))
    }

    pub fn find(&self, path: &str) -> Option<&TrackedConfig> {
        self.configs().map(|(_, c)| c).find(|c| c.path == path)
    }

    /// The cron expression, or `None` when scheduling is disabled.
    pub fn schedule(&self) -> Option<&str> {
        self.cron_schedule
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Retention limits for `config`, falling back to the document defaults.
    pub fn limits_for(&self, config: &TrackedConfig) -> RetentionLimits {
        let clamp = |v: Option<i64>| v.map(|n| n.clamp(0, u32::MAX as i64) as u32);
        RetentionLimits {
            max_backups: clamp(config.max_backups.or(self.default_max_backups)),
            max_age_days: clamp(config.max_backup_age_days.or(self.default_max_backup_age_days)),
        }
    }
}
