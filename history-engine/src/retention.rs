//! Retention policy: which backups to drop after a new one was stored.

use chrono::{DateTime, Duration, Utc};

use crate::settings::BackupType;
use crate::store::BackupRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionLimits {
    pub max_backups: Option<u32>,
    pub max_age_days: Option<u32>,
}

/// Select the records to delete.
///
/// `records` must be ascending by date. The result is the union of the
/// records exceeding `max_backups` (oldest first) and those older than
/// `max_age_days`, in ascending order. The newest record is never selected.
/// `single` configs keep exactly one record regardless of limits.
pub fn select_for_deletion<'a>(
    records: &'a [BackupRecord],
    backup_type: BackupType,
    limits: RetentionLimits,
    now: DateTime<Utc>,
) -> Vec<&'a BackupRecord> {
    let Some((_newest, older)) = records.split_last() else {
        return Vec::new();
    };

    if backup_type == BackupType::Single {
        return older.iter().collect();
    }

    let over_count = limits
        .max_backups
        .map(|max| records.len().saturating_sub(max as usize))
        .unwrap_or(0);
    let cutoff = limits
        .max_age_days
        .map(|days| now - Duration::days(i64::from(days)));

    older
        .iter()
        .enumerate()
        .filter(|(i, record)| *i < over_count || cutoff.is_some_and(|c| record.date < c))
        .map(|(_, record)| record)
        .collect()
}
