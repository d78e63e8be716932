//! Content fingerprints and capture of live config content.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::extract;
use crate::fs::{walk_directory, Access, IoPolicy};
use crate::settings::{BackupType, TrackedConfig};
use crate::snapshot::{TreeBundle, TreeEntry};
use crate::utils::errors::{EngineError, Result};

/// SHA-256 of captured content, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_hex(digest: &[u8]) -> Fingerprint {
    Fingerprint(digest.iter().map(|b| format!("{b:02x}")).collect())
}

pub fn hash_bytes(bytes: &[u8]) -> Fingerprint {
    to_hex(&Sha256::digest(bytes))
}

/// Fingerprint a set of files. Entries are hashed in relative-path order,
/// each as `len(path) ‖ path ‖ len(content) ‖ content`.
pub fn hash_tree(bundle: &TreeBundle) -> Fingerprint {
    let mut entries: Vec<&TreeEntry> = bundle.entries.iter().collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update((entry.path.len() as u64).to_be_bytes());
        hasher.update(entry.path.as_bytes());
        hasher.update((entry.content.len() as u64).to_be_bytes());
        hasher.update(&entry.content);
    }
    to_hex(&hasher.finalize())
}

/// Fingerprint whatever the store holds for a record, given its config type.
pub fn hash_stored(backup_type: BackupType, stored: &[u8]) -> io::Result<Fingerprint> {
    match backup_type {
        BackupType::Directory => Ok(hash_tree(&TreeBundle::decode(stored)?)),
        BackupType::Single | BackupType::Multiple => Ok(hash_bytes(stored)),
    }
}

/// One history's worth of live content.
#[derive(Debug, Clone)]
pub struct Capture {
    pub id: String,
    pub friendly_name: String,
    /// Bytes as they are stored in a backup record
    pub content: Vec<u8>,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone)]
pub struct ContentHasher {
    config_root: PathBuf,
    io: IoPolicy,
}

impl ContentHasher {
    pub fn new(config_root: impl Into<PathBuf>, io: IoPolicy) -> Self {
        Self {
            config_root: config_root.into(),
            io,
        }
    }

    /// Capture the live content of `config`, one entry per history.
    ///
    /// Fails with a read error when the target is missing or unreadable.
    pub async fn capture(&self, config: &TrackedConfig) -> Result<Vec<Capture>> {
        let live = config.live_path(&self.config_root);

        match config.backup_type {
            BackupType::Single => {
                let content = self.io.read(&live).await?;
                Ok(vec![Capture {
                    id: config.path.clone(),
                    friendly_name: config.display_name().to_string(),
                    fingerprint: hash_bytes(&content),
                    content,
                }])
            }
            BackupType::Multiple => {
                let bytes = self.io.read(&live).await?;
                let text = String::from_utf8(bytes)
                    .map_err(|_| EngineError::content(&live, "file is not valid UTF-8"))?;
                let items = extract::split_items(
                    &text,
                    config.id_node.as_deref().unwrap_or("id"),
                    config.friendly_name_node.as_deref().unwrap_or("alias"),
                )
                .map_err(|e| EngineError::content(&live, e.to_string()))?;

                Ok(items
                    .into_iter()
                    .map(|item| {
                        let content = item.yaml.into_bytes();
                        Capture {
                            id: item.id,
                            friendly_name: item.friendly_name,
                            fingerprint: hash_bytes(&content),
                            content,
                        }
                    })
                    .collect())
            }
            BackupType::Directory => {
                let bundle = self.read_tree(config).await?;
                let content = bundle
                    .encode()
                    .map_err(|e| EngineError::content(&live, e.to_string()))?;
                Ok(vec![Capture {
                    id: config.path.clone(),
                    friendly_name: config.display_name().to_string(),
                    fingerprint: hash_tree(&bundle),
                    content,
                }])
            }
        }
    }

    /// Read every file of a directory config that passes its filter.
    pub async fn read_tree(&self, config: &TrackedConfig) -> Result<TreeBundle> {
        let root = config.live_path(&self.config_root);
        let filter = config
            .filter()
            .map_err(|e| EngineError::Validation(format!("invalid file pattern: {e}")))?;

        let walk_root = root.clone();
        self.io
            .blocking(Access::Read, &root, move || {
                if !walk_root.is_dir() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "directory does not exist",
                    ));
                }
                let mut entries = Vec::new();
                for file in walk_directory(&walk_root, &filter)? {
                    entries.push(TreeEntry {
                        content: std::fs::read(&file.path)?,
                        path: file.relative_path,
                    });
                }
                Ok(TreeBundle::new(entries))
            })
            .await
    }
}
