use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hasher::Fingerprint;
use crate::settings::BackupType;

pub const INDEX_FILE: &str = "metadata.json";

/// Per-history metadata stored next to the records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryIndex {
    pub id: String,
    pub path: String,
    pub friendly_name: String,
    pub backup_type: BackupType,

    /// Fingerprint of the newest record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_hash: Option<Fingerprint>,

    /// Fingerprint of every record, by filename
    #[serde(default)]
    pub records: BTreeMap<String, Fingerprint>,
}

impl HistoryIndex {
    pub fn new(meta: &HistoryMeta) -> Self {
        Self {
            id: meta.id.clone(),
            path: meta.path.clone(),
            friendly_name: meta.friendly_name.clone(),
            backup_type: meta.backup_type,
            last_hash: None,
            records: BTreeMap::new(),
        }
    }

    /// Drop `filename` and point `last_hash` at the newest remaining record.
    pub fn forget(&mut self, filename: &str) {
        self.records.remove(filename);
        self.last_hash = self.records.values().next_back().cloned();
    }
}

/// What the store needs to know about a history when writing to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMeta {
    pub path: String,
    pub id: String,
    pub friendly_name: String,
    pub backup_type: BackupType,
}
