//! Directory snapshots.
//!
//! A directory backup is stored as a single zstd-compressed JSON document
//! listing every captured file. Entries are kept sorted by relative path.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::io;

/// zstd level used for bundles
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Path relative to the tracked directory, `/`-separated
    pub path: String,

    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeBundle {
    pub entries: Vec<TreeEntry>,
}

impl TreeBundle {
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { entries }
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
    }

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        let json = zstd::decode_all(bytes)?;
        Ok(serde_json::from_slice(&json)?)
    }

    pub fn get(&self, path: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.content.len() as u64).sum()
    }

    /// Human-readable listing of the bundle, used when a directory backup is
    /// fetched as raw text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str("==> ");
            out.push_str(&entry.path);
            out.push_str(" <==\n");
            match std::str::from_utf8(&entry.content) {
                Ok(text) => {
                    out.push_str(text);
                    if !text.is_empty() && !text.ends_with('\n') {
                        out.push('\n');
                    }
                }
                Err(_) => {
                    out.push_str(&format!("[binary, {} bytes]\n", entry.content.len()));
                }
            }
            out.push('\n');
        }
        out
    }
}

mod base64_bytes {
    use super::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Encode arbitrary bytes for a JSON payload.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
