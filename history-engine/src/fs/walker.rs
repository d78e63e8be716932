//! Directory traversal with include/exclude filtering.
//!
//! Results are sorted by relative path so that callers never depend on the
//! filesystem's iteration order.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use super::io::TEMP_PREFIX;

/// Include/exclude rules for a tracked directory.
///
/// A pattern matches when it matches either the relative path (with `/`
/// separators) or the bare file name. An empty include list admits every
/// file; excludes always win.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, globset::Error> {
        let include = if include.is_empty() {
            None
        } else {
            Some(build_set(include)?)
        };
        Ok(Self {
            include,
            exclude: build_set(exclude)?,
        })
    }

    /// Filter admitting every file.
    pub fn all() -> Self {
        Self {
            include: None,
            exclude: GlobSet::empty(),
        }
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        let hit = |set: &GlobSet| set.is_match(relative_path) || set.is_match(file_name);

        if hit(&self.exclude) {
            return false;
        }
        match &self.include {
            Some(include) => hit(include),
            None => true,
        }
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile(pattern)?);
    }
    builder.build()
}

fn compile(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root, `/`-separated
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,
}

/// Walk a directory tree and collect every regular file admitted by `filter`.
///
/// Symlinks are not followed. In-flight temporary files written by the
/// engine are skipped.
pub fn walk_directory(root: &Path, filter: &PathFilter) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() || is_temp(&entry) {
            continue;
        }

        let relative_path = relative_path(&entry, root);
        if !filter.matches(&relative_path) {
            continue;
        }

        files.push(FileInfo {
            path: entry.path().to_path_buf(),
            relative_path,
            size: entry.metadata()?.len(),
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

fn relative_path(entry: &DirEntry, root: &Path) -> String {
    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_temp(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
}
