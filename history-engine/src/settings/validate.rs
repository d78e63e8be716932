use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::{AppSettings, BackupType, ConfigGroup, TrackedConfig};
use crate::utils::errors::{EngineError, Result};

const MAX_GROUP_NAME_LEN: usize = 100;
const MAX_PATH_LEN: usize = 500;
const RESERVED_GROUP_NAMES: &[&str] = &["null", "undefined", "admin", "root", "system"];
const INVALID_GROUP_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Check a settings document before it is applied.
///
/// Returns non-fatal warnings on success. Any error rejects the whole
/// document; nothing is partially applied.
pub fn validate(settings: &AppSettings) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if !settings.home_assistant_config_dir.is_dir() {
        warnings.push(format!(
            "Home Assistant config directory does not exist: {}",
            settings.home_assistant_config_dir.display()
        ));
    }
    if !settings.backup_dir.is_dir() {
        warnings.push(format!(
            "Backup directory does not exist: {}",
            settings.backup_dir.display()
        ));
    }

    non_negative("defaultMaxBackups", settings.default_max_backups)?;
    non_negative("defaultMaxBackupAgeDays", settings.default_max_backup_age_days)?;

    validate_groups(&settings.config_groups, &settings.home_assistant_config_dir)?;
    Ok(warnings)
}

fn validate_groups(groups: &[ConfigGroup], config_root: &Path) -> Result<()> {
    let mut group_names = HashSet::new();
    // path -> owning group, for duplicate detection across groups
    let mut paths: HashMap<&str, &str> = HashMap::new();

    for (i, group) in groups.iter().enumerate() {
        validate_group_name(&group.group_name)
            .map_err(|e| invalid(format!("group at index {i}: {e}")))?;

        if !group_names.insert(group.group_name.as_str()) {
            return Err(invalid(format!("duplicate group name: '{}'", group.group_name)));
        }
        if group.configs.is_empty() {
            return Err(invalid(format!(
                "group '{}' must contain at least one config",
                group.group_name
            )));
        }

        for config in &group.configs {
            validate_config(config, &group.group_name, config_root)?;
            if let Some(existing) = paths.insert(config.path.as_str(), group.group_name.as_str()) {
                return Err(invalid(format!(
                    "config path '{}' is already assigned to group '{}', cannot assign to group '{}'",
                    config.path, existing, group.group_name
                )));
            }
        }
    }
    Ok(())
}

fn validate_group_name(name: &str) -> std::result::Result<(), String> {
    if name.trim().is_empty() {
        return Err("group name cannot be empty".into());
    }
    if name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(format!("group name cannot exceed {MAX_GROUP_NAME_LEN} characters"));
    }
    if name.contains(INVALID_GROUP_CHARS) {
        return Err("group name contains invalid characters".into());
    }
    if RESERVED_GROUP_NAMES
        .iter()
        .any(|reserved| name.eq_ignore_ascii_case(reserved))
    {
        return Err(format!("group name '{name}' is reserved"));
    }
    Ok(())
}

fn validate_config(config: &TrackedConfig, group: &str, config_root: &Path) -> Result<()> {
    let label = config.display_name();

    validate_path(&config.path, config_root)
        .map_err(|e| invalid(format!("config '{label}' in group '{group}': {e}")))?;

    if let Some(previous) = &config.previous_path {
        validate_path(previous, config_root)
            .map_err(|e| invalid(format!("config '{label}' previousPath: {e}")))?;
    }

    if config.backup_type == BackupType::Multiple {
        if blank(&config.id_node) {
            return Err(invalid(format!(
                "config '{label}' with backup type 'multiple' must have a valid idNode"
            )));
        }
        if blank(&config.friendly_name_node) {
            return Err(invalid(format!(
                "config '{label}' with backup type 'multiple' must have a valid friendlyNameNode"
            )));
        }
    }

    if config.backup_type == BackupType::Directory {
        config
            .filter()
            .map_err(|e| invalid(format!("config '{label}' has an invalid file pattern: {e}")))?;
    }

    non_negative(&format!("config '{label}' maxBackups"), config.max_backups)?;
    non_negative(
        &format!("config '{label}' maxBackupAgeDays"),
        config.max_backup_age_days,
    )?;
    Ok(())
}

fn validate_path(path: &str, config_root: &Path) -> std::result::Result<(), String> {
    if path.trim().is_empty() {
        return Err("config path cannot be empty".into());
    }
    if path.chars().count() > MAX_PATH_LEN {
        return Err(format!("config path cannot exceed {MAX_PATH_LEN} characters"));
    }
    if path.contains("..") {
        return Err("config path cannot contain '..' sequences".into());
    }
    let as_path = Path::new(path);
    if as_path.is_absolute() && !as_path.starts_with(config_root) {
        return Err("absolute paths must be within the Home Assistant config directory".into());
    }
    Ok(())
}

fn non_negative(field: &str, value: Option<i64>) -> Result<()> {
    match value {
        Some(v) if v < 0 => Err(invalid(format!("{field} must not be negative"))),
        _ => Ok(()),
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn invalid(message: String) -> EngineError {
    EngineError::Validation(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn settings_with(groups: Vec<ConfigGroup>) -> (TempDir, AppSettings) {
        let dir = TempDir::new().unwrap();
        let settings = AppSettings {
            home_assistant_config_dir: dir.path().to_path_buf(),
            backup_dir: dir.path().to_path_buf(),
            config_groups: groups,
            ..AppSettings::default()
        };
        (dir, settings)
    }

    fn error_message(settings: &AppSettings) -> String {
        match validate(settings) {
            Err(EngineError::Validation(message)) => message,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_document_has_no_warnings() {
        let (_dir, settings) = settings_with(vec![ConfigGroup::new(
            "Core",
            vec![TrackedConfig::single("Configuration", "configuration.yaml")],
        )]);
        assert_eq!(validate(&settings).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_missing_directories_are_warnings() {
        let settings = AppSettings {
            home_assistant_config_dir: PathBuf::from("/nonexistent/ha"),
            backup_dir: PathBuf::from("/nonexistent/backups"),
            ..AppSettings::default()
        };
        let warnings = validate(&settings).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("/nonexistent/ha"));
    }

    #[test]
    fn test_duplicate_path_across_groups() {
        let (_dir, settings) = settings_with(vec![
            ConfigGroup::new("A", vec![TrackedConfig::single("x", "configuration.yaml")]),
            ConfigGroup::new("B", vec![TrackedConfig::single("y", "configuration.yaml")]),
        ]);
        assert_eq!(
            error_message(&settings),
            "config path 'configuration.yaml' is already assigned to group 'A', cannot assign to group 'B'"
        );
    }

    #[test]
    fn test_group_name_rules() {
        for (name, expected) in [
            ("  ", "group name cannot be empty"),
            ("a/b", "group name contains invalid characters"),
            ("Admin", "group name 'Admin' is reserved"),
        ] {
            let (_dir, settings) = settings_with(vec![ConfigGroup::new(
                name,
                vec![TrackedConfig::single("c", "configuration.yaml")],
            )]);
            assert_eq!(error_message(&settings), format!("group at index 0: {expected}"));
        }

        let long = "g".repeat(101);
        let (_dir, settings) = settings_with(vec![ConfigGroup::new(
            &long,
            vec![TrackedConfig::single("c", "configuration.yaml")],
        )]);
        assert!(error_message(&settings).contains("cannot exceed 100"));
    }

    #[test]
    fn test_duplicate_and_empty_groups() {
        let (_dir, settings) = settings_with(vec![
            ConfigGroup::new("A", vec![TrackedConfig::single("x", "a.yaml")]),
            ConfigGroup::new("A", vec![TrackedConfig::single("y", "b.yaml")]),
        ]);
        assert_eq!(error_message(&settings), "duplicate group name: 'A'");

        let (_dir, settings) = settings_with(vec![ConfigGroup::new("Empty", vec![])]);
        assert_eq!(
            error_message(&settings),
            "group 'Empty' must contain at least one config"
        );
    }

    #[test]
    fn test_path_rules() {
        let (dir, _) = settings_with(vec![]);
        let inside = dir.path().join("packages/x.yaml");

        for (path, ok) in [
            ("", false),
            ("../secrets.yaml", false),
            ("/etc/passwd", false),
            (inside.to_str().unwrap(), true),
            ("packages/lights.yaml", true),
        ] {
            let (_d, mut settings) = settings_with(vec![ConfigGroup::new(
                "G",
                vec![TrackedConfig::single("c", path)],
            )]);
            settings.home_assistant_config_dir = dir.path().to_path_buf();
            assert_eq!(validate(&settings).is_ok(), ok, "path {path:?}");
        }

        let long = "a".repeat(501);
        let (_dir, settings) = settings_with(vec![ConfigGroup::new(
            "G",
            vec![TrackedConfig::single("c", &long)],
        )]);
        assert!(error_message(&settings).contains("cannot exceed 500"));
    }

    #[test]
    fn test_multiple_requires_nodes() {
        let mut config = TrackedConfig::multiple("Automations", "automations.yaml", "id", "alias");
        config.friendly_name_node = Some(" ".into());
        let (_dir, settings) = settings_with(vec![ConfigGroup::new("A", vec![config])]);
        assert_eq!(
            error_message(&settings),
            "config 'Automations' with backup type 'multiple' must have a valid friendlyNameNode"
        );
    }

    #[test]
    fn test_retention_must_be_non_negative() {
        let mut config = TrackedConfig::single("Configuration", "configuration.yaml");
        config.max_backups = Some(0);
        let (_dir, mut settings) = settings_with(vec![ConfigGroup::new("A", vec![config.clone()])]);
        assert!(validate(&settings).is_ok());

        config.max_backup_age_days = Some(-1);
        settings.config_groups = vec![ConfigGroup::new("A", vec![config])];
        assert_eq!(
            error_message(&settings),
            "config 'Configuration' maxBackupAgeDays must not be negative"
        );

        settings.config_groups = vec![];
        settings.default_max_backups = Some(-3);
        assert_eq!(error_message(&settings), "defaultMaxBackups must not be negative");
    }

    #[test]
    fn test_invalid_directory_pattern() {
        let config = TrackedConfig::directory("ESP", "esphome", &["[bad"], &[]);
        let (_dir, settings) = settings_with(vec![ConfigGroup::new("A", vec![config])]);
        assert!(error_message(&settings).starts_with("config 'ESP' has an invalid file pattern"));
    }
}
