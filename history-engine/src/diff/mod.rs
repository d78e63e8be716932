//! Comparison of two versions of a tracked config.
//!
//! Text under the size ceiling becomes a unified diff. Anything else (binary
//! content, oversized input, or no previous version at all) is returned
//! verbatim so the client can show it side by side.

pub mod lcs;
pub mod unified;

use serde::{Deserialize, Serialize};

use crate::config::EngineOptions;
use crate::snapshot::{to_base64, TreeBundle};

pub use unified::unified_diff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Utf8,
    Base64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackupDiffResponse {
    #[serde(rename_all = "camelCase")]
    Diff {
        unified_diff: String,
        old_filename: String,
        new_filename: String,
        is_first_backup: bool,
    },

    #[serde(rename_all = "camelCase")]
    Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        old_content: Option<String>,
        new_content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        old_filename: Option<String>,
        new_filename: String,
        encoding: ContentEncoding,
        is_first_backup: bool,
    },
}

/// How the stored bytes of a version are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// A single file's bytes
    Plain,
    /// A directory snapshot ([`TreeBundle`])
    Bundle,
}

/// One side of a comparison.
#[derive(Debug, Clone, Copy)]
pub struct Version<'a> {
    pub label: &'a str,
    pub content: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
pub struct DiffEngine {
    context: usize,
    max_bytes: usize,
    max_cells: usize,
}

impl DiffEngine {
    pub fn new(context: usize, max_bytes: usize, max_cells: usize) -> Self {
        Self {
            context,
            max_bytes,
            max_cells,
        }
    }

    pub fn from_options(options: &EngineOptions) -> Self {
        Self::new(
            options.context_lines,
            options.max_diff_bytes,
            options.max_diff_cells,
        )
    }

    /// Compare `old` (absent for a first backup) against `new`.
    pub fn compare(
        &self,
        old: Option<Version<'_>>,
        new: Version<'_>,
        format: Format,
    ) -> std::io::Result<BackupDiffResponse> {
        match format {
            Format::Plain => Ok(self.compare_plain(old, new)),
            Format::Bundle => {
                let new_tree = TreeBundle::decode(new.content)?;
                let old_tree = old.map(|v| TreeBundle::decode(v.content)).transpose()?;
                Ok(self.compare_trees(old.map(|v| v.label), old_tree.as_ref(), new.label, &new_tree))
            }
        }
    }

    fn compare_plain(&self, old: Option<Version<'_>>, new: Version<'_>) -> BackupDiffResponse {
        let Some(old) = old else {
            return verbatim(None, new);
        };

        match (self.text(old.content), self.text(new.content)) {
            (Some(old_text), Some(new_text)) => {
                match unified_diff(old_text, new_text, old.label, new.label, self.context, self.max_cells) {
                    Some(unified_diff) => BackupDiffResponse::Diff {
                        unified_diff,
                        old_filename: old.label.to_string(),
                        new_filename: new.label.to_string(),
                        is_first_backup: false,
                    },
                    None => verbatim(Some(old), new),
                }
            }
            _ => verbatim(Some(old), new),
        }
    }

    fn compare_trees(
        &self,
        old_label: Option<&str>,
        old: Option<&TreeBundle>,
        new_label: &str,
        new: &TreeBundle,
    ) -> BackupDiffResponse {
        let (Some(old_label), Some(old)) = (old_label, old) else {
            return BackupDiffResponse::Content {
                old_content: None,
                new_content: new.render(),
                old_filename: None,
                new_filename: new_label.to_string(),
                encoding: ContentEncoding::Utf8,
                is_first_backup: true,
            };
        };

        BackupDiffResponse::Diff {
            unified_diff: self.diff_trees(old, new),
            old_filename: old_label.to_string(),
            new_filename: new_label.to_string(),
            is_first_backup: false,
        }
    }

    /// Git-style per-file diff of two directory snapshots.
    pub fn diff_trees(&self, old: &TreeBundle, new: &TreeBundle) -> String {
        let mut paths: Vec<&str> = old
            .entries
            .iter()
            .chain(&new.entries)
            .map(|e| e.path.as_str())
            .collect();
        paths.sort_unstable();
        paths.dedup();

        let mut out = String::new();
        for path in paths {
            let before = old.get(path).map(|e| e.content.as_slice());
            let after = new.get(path).map(|e| e.content.as_slice());
            if before == after {
                continue;
            }

            let old_label = before.map_or_else(|| "/dev/null".to_string(), |_| format!("a/{path}"));
            let new_label = after.map_or_else(|| "/dev/null".to_string(), |_| format!("b/{path}"));

            out.push_str(&format!("diff --git a/{path} b/{path}\n"));
            let texts = (
                self.text(before.unwrap_or_default()),
                self.text(after.unwrap_or_default()),
            );
            let rendered = match texts {
                (Some(a), Some(b)) => unified_diff(a, b, &old_label, &new_label, self.context, self.max_cells),
                _ => None,
            };
            let binary = [before, after]
                .into_iter()
                .flatten()
                .any(|c| std::str::from_utf8(c).is_err());
            match rendered {
                Some(section) if !section.is_empty() => out.push_str(&section),
                // empty files added or removed, or identical after all
                Some(_) => {}
                None if binary => out.push_str(&format!("Binary files {old_label} and {new_label} differ\n")),
                None => out.push_str(&format!(
                    "Files {old_label} and {new_label} differ (too large to diff)\n"
                )),
            }
        }
        out
    }

    /// The content as text, if it is UTF-8 and under the size ceiling.
    fn text<'a>(&self, content: &'a [u8]) -> Option<&'a str> {
        if content.len() > self.max_bytes {
            return None;
        }
        std::str::from_utf8(content).ok()
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::from_options(&EngineOptions::default())
    }
}

fn verbatim(old: Option<Version<'_>>, new: Version<'_>) -> BackupDiffResponse {
    let all_text = std::str::from_utf8(new.content).is_ok()
        && old.map_or(true, |o| std::str::from_utf8(o.content).is_ok());

    let encoding = if all_text {
        ContentEncoding::Utf8
    } else {
        ContentEncoding::Base64
    };
    let render = |bytes: &[u8]| match encoding {
        ContentEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        ContentEncoding::Base64 => to_base64(bytes),
    };

    BackupDiffResponse::Content {
        old_content: old.map(|o| render(o.content)),
        new_content: render(new.content),
        old_filename: old.map(|o| o.label.to_string()),
        new_filename: new.label.to_string(),
        encoding,
        is_first_backup: old.is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TreeEntry;

    fn v<'a>(label: &'a str, content: &'a [u8]) -> Version<'a> {
        Version { label, content }
    }

    #[test]
    fn test_same_content_is_empty_diff() {
        let response = DiffEngine::default()
            .compare(Some(v("a", b"x: 1\n")), v("b", b"x: 1\n"), Format::Plain)
            .unwrap();
        assert_eq!(
            response,
            BackupDiffResponse::Diff {
                unified_diff: String::new(),
                old_filename: "a".into(),
                new_filename: "b".into(),
                is_first_backup: false,
            }
        );
    }

    #[test]
    fn test_first_backup_is_content() {
        let response = DiffEngine::default()
            .compare(None, v("1700000000000-0000.yaml", b"x: 1\n"), Format::Plain)
            .unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["isFirstBackup"], true);
        assert_eq!(json["newContent"], "x: 1\n");
        assert_eq!(json["encoding"], "utf8");
        assert!(json.get("oldContent").is_none());
    }

    #[test]
    fn test_diff_wire_format() {
        let response = DiffEngine::default()
            .compare(Some(v("old", b"line1\nline2\n")), v("new", b"line1\nlineX\n"), Format::Plain)
            .unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "diff");
        assert_eq!(json["oldFilename"], "old");
        assert_eq!(
            json["unifiedDiff"],
            "--- old\n+++ new\n@@ -1,2 +1,2 @@\n line1\n-line2\n+lineX\n"
        );
    }

    #[test]
    fn test_binary_is_base64_content() {
        let response = DiffEngine::default()
            .compare(Some(v("old", &[0xff, 0x00])), v("new", b"text"), Format::Plain)
            .unwrap();
        match response {
            BackupDiffResponse::Content {
                old_content,
                new_content,
                encoding,
                is_first_backup,
                ..
            } => {
                assert_eq!(encoding, ContentEncoding::Base64);
                assert_eq!(old_content.as_deref(), Some("/wA="));
                assert_eq!(new_content, "dGV4dA==");
                assert!(!is_first_backup);
            }
            other => panic!("expected content, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_is_verbatim_text() {
        let engine = DiffEngine::new(3, 4, usize::MAX);
        let response = engine
            .compare(Some(v("old", b"12345\n")), v("new", b"123\n"), Format::Plain)
            .unwrap();
        assert!(matches!(
            response,
            BackupDiffResponse::Content { encoding: ContentEncoding::Utf8, is_first_backup: false, .. }
        ));
    }

    fn bundle(entries: &[(&str, &[u8])]) -> TreeBundle {
        TreeBundle::new(
            entries
                .iter()
                .map(|(p, c)| TreeEntry {
                    path: p.to_string(),
                    content: c.to_vec(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_tree_diff() {
        let old = bundle(&[("a.yaml", b"a: 1\n"), ("gone.yaml", b"x\n"), ("same", b"s\n"), ("img", &[0xff])]);
        let new = bundle(&[("a.yaml", b"a: 2\n"), ("added.yaml", b"y\n"), ("same", b"s\n"), ("img", &[0xfe])]);

        let out = DiffEngine::default().diff_trees(&old, &new);
        assert_eq!(
            out,
            "diff --git a/a.yaml b/a.yaml\n--- a/a.yaml\n+++ b/a.yaml\n@@ -1 +1 @@\n-a: 1\n+a: 2\n\
             diff --git a/added.yaml b/added.yaml\n--- /dev/null\n+++ b/added.yaml\n@@ -0,0 +1 @@\n+y\n\
             diff --git a/gone.yaml b/gone.yaml\n--- a/gone.yaml\n+++ /dev/null\n@@ -1 +0,0 @@\n-x\n\
             diff --git a/img b/img\nBinary files a/img and b/img differ\n"
        );
        assert_eq!(DiffEngine::default().diff_trees(&new, &new), "");
    }

    #[test]
    fn test_tree_diff_oversized_text_member() {
        let old = bundle(&[("big.yaml", b"0123456789\n")]);
        let new = bundle(&[("big.yaml", b"9876543210\n")]);

        let out = DiffEngine::new(3, 4, usize::MAX).diff_trees(&old, &new);
        assert_eq!(
            out,
            "diff --git a/big.yaml b/big.yaml\n\
             Files a/big.yaml and b/big.yaml differ (too large to diff)\n"
        );
    }

    #[test]
    fn test_bundle_first_backup_renders_listing() -> std::io::Result<()> {
        let tree = bundle(&[("node.yaml", b"esphome: {}\n")]);
        let encoded = tree.encode()?;
        let response = DiffEngine::default().compare(None, v("new", &encoded), Format::Bundle)?;
        match response {
            BackupDiffResponse::Content { new_content, is_first_backup, .. } => {
                assert!(is_first_backup);
                assert!(new_content.contains("==> node.yaml <=="));
            }
            other => panic!("expected content, got {other:?}"),
        }
        Ok(())
    }
}
