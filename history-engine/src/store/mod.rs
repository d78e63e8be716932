//! On-disk backup histories.
//!
//! Layout: `<root>/<encoded path>/<encoded id>/{metadata.json, <records>}`.
//! Record files are immutable and written atomically; the index carries
//! per-record fingerprints and the last known hash of the history.

pub mod index;
pub mod lock;
pub mod naming;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fs::{Access, IoPolicy};
use crate::hasher::{hash_stored, Fingerprint};
use crate::settings::BackupType;
use crate::utils::errors::{EngineError, Result};

pub use index::{HistoryIndex, HistoryMeta, INDEX_FILE};
pub use lock::{PathGuard, PathLocks};
pub use naming::Stamp;

/// One stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub path: String,
    pub id: String,
    pub filename: String,
    pub date: DateTime<Utc>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<Fingerprint>,
}

/// Listing entry returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupInfo {
    pub filename: String,
    pub date: DateTime<Utc>,
    pub size: u64,
}

impl From<&BackupRecord> for BackupInfo {
    fn from(record: &BackupRecord) -> Self {
        Self {
            filename: record.filename.clone(),
            date: record.date,
            size: record.size,
        }
    }
}

/// A record file found on disk.
#[derive(Debug, Clone)]
struct Scanned {
    filename: String,
    stamp: Stamp,
    size: u64,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    io: IoPolicy,
    locks: Arc<PathLocks>,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>, io: IoPolicy, locks: Arc<PathLocks>) -> Self {
        Self {
            root: root.into(),
            io,
            locks,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Take the write lock for a config path.
    pub async fn lock(&self, path: &str) -> Result<PathGuard> {
        self.locks.acquire(path).await
    }

    fn config_dir(&self, path: &str) -> PathBuf {
        self.root.join(naming::encode_component(path))
    }

    fn history_dir(&self, path: &str, id: &str) -> PathBuf {
        self.config_dir(path).join(naming::encode_component(id))
    }

    /// Store a new record and make it the head of the history.
    pub async fn create(
        &self,
        guard: &PathGuard,
        meta: &HistoryMeta,
        content: &[u8],
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<BackupRecord> {
        debug_assert_eq!(guard.path(), meta.path);

        let dir = self.history_dir(&meta.path, &meta.id);
        self.io.create_dir_all(&dir).await?;

        let last = self.scan(&dir).await?.last().map(|s| s.stamp);
        let stamp = Stamp::next(last, now.timestamp_millis());
        let filename = stamp.filename(&naming::record_extension(&meta.path, meta.backup_type));
        let record_path = dir.join(&filename);

        self.io.write_atomic(&record_path, content).await?;

        let mut index = self
            .load_index(&dir)
            .await?
            .unwrap_or_else(|| HistoryIndex::new(meta));
        index.path = meta.path.clone();
        index.friendly_name = meta.friendly_name.clone();
        index.backup_type = meta.backup_type;
        index.records.insert(filename.clone(), fingerprint.clone());
        index.last_hash = Some(fingerprint.clone());

        if let Err(e) = self.save_index(&dir, &index).await {
            // an unindexed head would be snapshotted again on the next run
            if let Err(cleanup) = self.io.remove_file(&record_path).await {
                tracing::error!(file = %record_path.display(), error = %cleanup, "Failed to roll back record");
            }
            return Err(e);
        }

        tracing::debug!(path = %meta.path, id = %meta.id, filename = %filename, "Stored backup record");

        Ok(BackupRecord {
            path: meta.path.clone(),
            id: meta.id.clone(),
            filename,
            date: stamp.date(),
            size: content.len() as u64,
            content_hash: Some(fingerprint.clone()),
        })
    }

    /// All records of a history, oldest first. Empty when none exist.
    pub async fn list(&self, path: &str, id: &str) -> Result<Vec<BackupRecord>> {
        let dir = self.history_dir(path, id);
        let index = self.load_index(&dir).await?;
        let scanned = self.scan(&dir).await?;

        Ok(scanned
            .into_iter()
            .map(|s| BackupRecord {
                path: path.to_string(),
                id: id.to_string(),
                content_hash: index.as_ref().and_then(|i| i.records.get(&s.filename).cloned()),
                date: s.stamp.date(),
                filename: s.filename,
                size: s.size,
            })
            .collect())
    }

    /// Raw bytes of a record.
    pub async fn read(&self, path: &str, id: &str, filename: &str) -> Result<Vec<u8>> {
        let missing = || EngineError::not_found("Backup", format!("{path}/{id}/{filename}"));
        if Stamp::parse(filename).is_none() {
            return Err(missing());
        }
        self.io
            .read_optional(&self.history_dir(path, id).join(filename))
            .await?
            .ok_or_else(missing)
    }

    /// Delete a single record.
    pub async fn delete(&self, guard: &PathGuard, path: &str, id: &str, filename: &str) -> Result<()> {
        debug_assert_eq!(guard.path(), path);

        let missing = || EngineError::not_found("Backup", format!("{path}/{id}/{filename}"));
        if Stamp::parse(filename).is_none() {
            return Err(missing());
        }

        let dir = self.history_dir(path, id);
        match self.io.remove_file(&dir.join(filename)).await {
            Ok(()) => {}
            Err(EngineError::Write { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                return Err(missing());
            }
            Err(e) => return Err(e),
        }

        self.after_delete(&dir, &[filename.to_string()]).await?;
        tracing::info!(path = %path, id = %id, filename = %filename, "Deleted backup");
        Ok(())
    }

    /// Delete every record of a history; returns how many were removed.
    ///
    /// When some removals fail the survivors stay indexed and the error
    /// names both sets.
    pub async fn delete_all(&self, guard: &PathGuard, path: &str, id: &str) -> Result<usize> {
        debug_assert_eq!(guard.path(), path);

        let dir = self.history_dir(path, id);
        let mut deleted = Vec::new();
        let mut remaining = Vec::new();

        for scanned in self.scan(&dir).await? {
            match self.io.remove_file(&dir.join(&scanned.filename)).await {
                Ok(()) => deleted.push(scanned.filename),
                Err(e) => {
                    tracing::error!(path = %path, id = %id, filename = %scanned.filename, error = %e, "Failed to delete backup");
                    remaining.push(scanned.filename);
                }
            }
        }

        if remaining.is_empty() {
            self.after_delete(&dir, &deleted).await?;
        } else {
            if let Err(e) = self.after_delete(&dir, &deleted).await {
                tracing::warn!(path = %path, id = %id, error = %e, "Index not updated after partial delete");
            }
            return Err(EngineError::PartialDelete {
                identifier: format!("{path}/{id}"),
                deleted,
                remaining,
            });
        }

        tracing::info!(path = %path, id = %id, count = deleted.len(), "Deleted all backups");
        Ok(deleted.len())
    }

    /// Fix up the index after records were removed; drop the history when empty.
    async fn after_delete(&self, dir: &Path, removed: &[String]) -> Result<()> {
        let survivors = self.scan(dir).await?;

        if survivors.is_empty() {
            let index_path = dir.join(INDEX_FILE);
            if self.io.read_optional(&index_path).await?.is_some() {
                self.io.remove_file(&index_path).await?;
            }
            if let Err(e) = tokio::fs::remove_dir(dir).await {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(dir = %dir.display(), error = %e, "History directory left behind");
                }
            }
            if let Some(parent) = dir.parent() {
                // only succeeds once the last history of the path is gone
                let _ = tokio::fs::remove_dir(parent).await;
            }
            return Ok(());
        }

        if removed.is_empty() {
            return Ok(());
        }

        if let Some(mut index) = self.load_index(dir).await? {
            for filename in removed {
                index.forget(filename);
            }
            let newest = survivors.last().map(|s| s.filename.as_str());
            index.last_hash = newest.and_then(|n| index.records.get(n).cloned());
            self.save_index(dir, &index).await?;
        }
        Ok(())
    }

    /// Fingerprint of the newest record, if any.
    ///
    /// Falls back to hashing the newest record when the index does not know it.
    pub async fn last_hash(&self, meta: &HistoryMeta) -> Result<Option<Fingerprint>> {
        let dir = self.history_dir(&meta.path, &meta.id);
        if let Some(hash) = self.load_index(&dir).await?.and_then(|i| i.last_hash) {
            return Ok(Some(hash));
        }

        let Some(newest) = self.scan(&dir).await?.pop() else {
            return Ok(None);
        };
        let record_path = dir.join(&newest.filename);
        let content = self.io.read(&record_path).await?;
        let hash = hash_stored(meta.backup_type, &content)
            .map_err(|e| EngineError::content(&record_path, e.to_string()))?;
        Ok(Some(hash))
    }

    /// Every history stored under a config path.
    ///
    /// Histories without a readable index are reported with their decoded id
    /// as the friendly name.
    pub async fn histories(&self, path: &str, backup_type: BackupType) -> Result<Vec<HistoryIndex>> {
        let config_dir = self.config_dir(path);
        let names = self
            .io
            .blocking(Access::Read, &config_dir, {
                let config_dir = config_dir.clone();
                move || {
                    let entries = match std::fs::read_dir(&config_dir) {
                        Ok(entries) => entries,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                        Err(e) => return Err(e),
                    };
                    let mut names = Vec::new();
                    for entry in entries {
                        let entry = entry?;
                        if entry.file_type()?.is_dir() {
                            names.push(entry.file_name().to_string_lossy().into_owned());
                        }
                    }
                    names.sort();
                    Ok(names)
                }
            })
            .await?;

        let mut histories = Vec::new();
        for name in names {
            let Some(id) = naming::decode_component(&name) else {
                tracing::warn!(dir = %name, "Skipping history with undecodable name");
                continue;
            };
            let index = match self.load_index(&config_dir.join(&name)).await? {
                Some(index) => index,
                None => HistoryIndex::new(&HistoryMeta {
                    path: path.to_string(),
                    friendly_name: id.clone(),
                    id,
                    backup_type,
                }),
            };
            histories.push(index);
        }
        Ok(histories)
    }

    /// Move every history of `old_path` to `new_path`.
    ///
    /// Histories keyed by the path itself (single files, directories) are
    /// re-keyed to the new path. Callers hold the locks of both paths.
    pub async fn rename_history(&self, old_path: &str, new_path: &str) -> Result<()> {
        let from = self.config_dir(old_path);
        let to = self.config_dir(new_path);

        if !tokio::fs::try_exists(&from).await.unwrap_or(false) {
            return Ok(());
        }
        if tokio::fs::try_exists(&to).await.unwrap_or(false) {
            return Err(EngineError::Validation(format!(
                "backup history already exists for '{new_path}'"
            )));
        }

        self.io.rename(&from, &to).await?;

        for mut index in self.histories(new_path, BackupType::Single).await? {
            let mut dir = to.join(naming::encode_component(&index.id));
            if index.id == old_path {
                let renamed = to.join(naming::encode_component(new_path));
                self.io.rename(&dir, &renamed).await?;
                dir = renamed;
                index.id = new_path.to_string();
            }
            index.path = new_path.to_string();
            self.save_index(&dir, &index).await?;
        }

        tracing::info!(from = %old_path, to = %new_path, "Moved backup history");
        Ok(())
    }

    async fn scan(&self, dir: &Path) -> Result<Vec<Scanned>> {
        let owned = dir.to_path_buf();
        self.io
            .blocking(Access::Read, dir, move || {
                let entries = match std::fs::read_dir(&owned) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => return Err(e),
                };

                let mut found = Vec::new();
                for entry in entries {
                    let entry = entry?;
                    let filename = entry.file_name().to_string_lossy().into_owned();
                    let Some(stamp) = Stamp::parse(&filename) else {
                        continue;
                    };
                    let metadata = match entry.metadata() {
                        Ok(m) => m,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(e),
                    };
                    if metadata.is_file() {
                        found.push(Scanned {
                            filename,
                            stamp,
                            size: metadata.len(),
                        });
                    }
                }
                found.sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.filename.cmp(&b.filename)));
                Ok(found)
            })
            .await
    }

    async fn load_index(&self, dir: &Path) -> Result<Option<HistoryIndex>> {
        let path = dir.join(INDEX_FILE);
        let Some(bytes) = self.io.read_optional(&path).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Ignoring unreadable history index");
                Ok(None)
            }
        }
    }

    async fn save_index(&self, dir: &Path, index: &HistoryIndex) -> Result<()> {
        let json = serde_json::to_vec_pretty(index)?;
        self.io.write_atomic(&dir.join(INDEX_FILE), &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_bytes;
    use crate::utils::ErrorKind;
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(root: &Path) -> BackupStore {
        let io = IoPolicy::new(Duration::from_secs(5), Duration::from_millis(1));
        BackupStore::new(root, io, Arc::new(PathLocks::new(Duration::from_millis(50))))
    }

    fn meta(path: &str, id: &str, backup_type: BackupType) -> HistoryMeta {
        HistoryMeta {
            path: path.into(),
            id: id.into(),
            friendly_name: format!("{id} name"),
            backup_type,
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    async fn put(store: &BackupStore, meta: &HistoryMeta, content: &[u8], millis: i64) -> BackupRecord {
        let guard = store.lock(&meta.path).await.unwrap();
        store
            .create(&guard, meta, content, &hash_bytes(content), at(millis))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_list_read() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let m = meta("automations.yaml", "a1", BackupType::Multiple);

        let first = put(&store, &m, b"v1", 1_700_000_000_000).await;
        let second = put(&store, &m, b"v2", 1_700_000_000_000).await;
        assert_eq!(first.filename, "1700000000000-0000.yaml");
        assert_eq!(second.filename, "1700000000000-0001.yaml");

        let records = store.list("automations.yaml", "a1").await?;
        assert_eq!(records, vec![first.clone(), second.clone()]);
        assert_eq!(store.read("automations.yaml", "a1", &second.filename).await?, b"v2");
        assert_eq!(store.last_hash(&m).await?, Some(hash_bytes(b"v2")));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_history_and_filename() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());

        assert!(store.list("nothing.yaml", "nothing.yaml").await?.is_empty());
        let err = store
            .read("nothing.yaml", "nothing.yaml", "1700000000000-0000.yaml")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = store.read("a", "a", "../metadata.json").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_path_components_stay_inside_root() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let m = meta("../escape.yaml", "..", BackupType::Single);

        put(&store, &m, b"x", 1).await;
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["%2E.%2Fescape.yaml".to_string()]);
        assert!(!dir.path().parent().unwrap().join("escape.yaml").exists());
    }

    #[tokio::test]
    async fn test_delete_moves_last_hash_back() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let m = meta("scenes.yaml", "s1", BackupType::Multiple);

        put(&store, &m, b"v1", 1_000).await;
        let newest = put(&store, &m, b"v2", 2_000).await;

        let guard = store.lock("scenes.yaml").await?;
        store.delete(&guard, "scenes.yaml", "s1", &newest.filename).await?;
        assert_eq!(store.last_hash(&m).await?, Some(hash_bytes(b"v1")));

        let err = store
            .delete(&guard, "scenes.yaml", "s1", &newest.filename)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_all_removes_history() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let m = meta("configuration.yaml", "configuration.yaml", BackupType::Single);

        for i in 0..3 {
            put(&store, &m, format!("v{i}").as_bytes(), 1_000 + i).await;
        }

        let guard = store.lock("configuration.yaml").await?;
        assert_eq!(store.delete_all(&guard, "configuration.yaml", "configuration.yaml").await?, 3);
        assert!(store.list("configuration.yaml", "configuration.yaml").await?.is_empty());
        assert_eq!(store.last_hash(&m).await?, None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        Ok(())
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_delete_all_reports_survivors() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let m = meta("automations.yaml", "a1", BackupType::Multiple);
        let mut created = Vec::new();
        for i in 0..2 {
            created.push(put(&store, &m, format!("v{i}").as_bytes(), 2_000 + i).await.filename);
        }

        let history = store.history_dir("automations.yaml", "a1");
        std::fs::set_permissions(&history, std::fs::Permissions::from_mode(0o555)).unwrap();
        if std::fs::File::create(history.join("writable")).is_ok() {
            // permissions are not enforced for this user (root)
            std::fs::set_permissions(&history, std::fs::Permissions::from_mode(0o755)).unwrap();
            return Ok(());
        }

        let guard = store.lock("automations.yaml").await?;
        let err = store.delete_all(&guard, "automations.yaml", "a1").await.unwrap_err();
        std::fs::set_permissions(&history, std::fs::Permissions::from_mode(0o755)).unwrap();

        match &err {
            EngineError::PartialDelete { deleted, remaining, .. } => {
                assert!(deleted.is_empty());
                assert_eq!(remaining, &created);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), ErrorKind::WriteError);

        let listed: Vec<_> = store.list("automations.yaml", "a1").await?.into_iter().map(|r| r.filename).collect();
        assert_eq!(listed, created);
        assert_eq!(store.last_hash(&m).await?, Some(hash_bytes(b"v1")));
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_skips_temp_files_and_index() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let m = meta("automations.yaml", "a1", BackupType::Multiple);
        let record = put(&store, &m, b"v1", 1_000).await;

        let history = dir.path().join("automations.yaml").join("a1");
        std::fs::write(history.join(".tmp-123-0000000002000-0000.yaml"), b"partial").unwrap();

        let records = store.list("automations.yaml", "a1").await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, record.filename);
        Ok(())
    }

    #[tokio::test]
    async fn test_last_hash_without_index() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let m = meta("automations.yaml", "a1", BackupType::Multiple);
        put(&store, &m, b"v1", 1_000).await;

        std::fs::remove_file(dir.path().join("automations.yaml/a1").join(INDEX_FILE)).unwrap();
        assert_eq!(store.last_hash(&m).await?, Some(hash_bytes(b"v1")));
        Ok(())
    }

    #[tokio::test]
    async fn test_histories() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        put(&store, &meta("automations.yaml", "b", BackupType::Multiple), b"1", 1).await;
        put(&store, &meta("automations.yaml", "a", BackupType::Multiple), b"2", 2).await;

        let histories = store.histories("automations.yaml", BackupType::Multiple).await?;
        let ids: Vec<_> = histories.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(histories[0].friendly_name, "a name");
        assert!(store.histories("none.yaml", BackupType::Single).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_history() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let single = meta("old.yaml", "old.yaml", BackupType::Single);
        put(&store, &single, b"content", 1).await;

        store.rename_history("old.yaml", "new.yaml").await?;

        assert!(store.list("old.yaml", "old.yaml").await?.is_empty());
        let records = store.list("new.yaml", "new.yaml").await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content_hash, Some(hash_bytes(b"content")));

        let moved = meta("new.yaml", "new.yaml", BackupType::Single);
        assert_eq!(store.last_hash(&moved).await?, Some(hash_bytes(b"content")));

        // renaming something without history is a no-op
        store.rename_history("never.yaml", "other.yaml").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_onto_existing_history_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        put(&store, &meta("a.yaml", "a.yaml", BackupType::Single), b"a", 1).await;
        put(&store, &meta("b.yaml", "b.yaml", BackupType::Single), b"b", 1).await;

        let err = store.rename_history("a.yaml", "b.yaml").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
