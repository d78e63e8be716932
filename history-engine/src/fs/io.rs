//! Bounded filesystem operations.
//!
//! Every step runs under a timeout and is retried once after a short backoff
//! when the failure looks transient. Writes go to a temporary sibling and are
//! renamed into place, so readers never observe a partially written file.

use crate::config::EngineOptions;
use crate::utils::errors::{is_transient, EngineError, Result};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Prefix of in-flight temporary files; listings skip anything carrying it.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Which side of the taxonomy a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
pub struct IoPolicy {
    pub timeout: Duration,
    pub backoff: Duration,
}

impl IoPolicy {
    pub fn new(timeout: Duration, backoff: Duration) -> Self {
        Self { timeout, backoff }
    }

    pub fn from_options(options: &EngineOptions) -> Self {
        Self::new(options.io_timeout(), options.retry_backoff())
    }

    /// Run `op` with a timeout, retrying once on a transient failure.
    pub async fn run<T, F, Fut>(&self, access: Access, path: &Path, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("operation exceeded {:?}", self.timeout),
                ),
            };

            if attempt < 2 && is_transient(&err) {
                tracing::debug!(path = %path.display(), error = %err, "Retrying transient I/O failure");
                tokio::time::sleep(self.backoff).await;
                continue;
            }

            return Err(match access {
                Access::Read => EngineError::read(path, err),
                Access::Write => EngineError::write(path, err),
            });
        }
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.run(Access::Read, path, || tokio::fs::read(path)).await
    }

    /// Read a file, mapping "does not exist" to `None`.
    pub async fn read_optional(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        self.run(Access::Read, path, || async move {
            match tokio::fs::read(path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Write `contents` to `path` atomically (temp file + rename).
    ///
    /// An existing file's permission bits are carried over to the new file.
    pub async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let contents: Arc<[u8]> = Arc::from(contents);
        self.run(Access::Write, path, || write_atomic(path, Arc::clone(&contents)))
            .await
    }

    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        self.run(Access::Write, path, || tokio::fs::remove_file(path))
            .await
    }

    pub async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.run(Access::Write, to, || tokio::fs::rename(from, to)).await
    }

    pub async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.run(Access::Write, path, || tokio::fs::create_dir_all(path))
            .await
    }

    /// Run blocking filesystem work on the blocking pool under the policy.
    pub async fn blocking<T, F>(&self, access: Access, path: &Path, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> io::Result<T> + Clone + Send + 'static,
    {
        self.run(access, path, || {
            let work = work.clone();
            async move {
                tokio::task::spawn_blocking(work)
                    .await
                    .map_err(io::Error::other)?
            }
        })
        .await
    }
}

/// Removes the temporary file unless the rename went through.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Runs to completion on the blocking pool even when the caller stops
/// waiting, so a timeout never leaves a half-written temporary behind.
async fn write_atomic(path: &Path, contents: Arc<[u8]>) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &contents))
        .await
        .map_err(io::Error::other)?
}

fn write_atomic_blocking(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let mut guard = TempGuard {
        path: temp_sibling(path),
        armed: true,
    };
    let mut file = std::fs::File::create(&guard.path)?;
    file.write_all(contents)?;
    if let Ok(existing) = std::fs::metadata(path) {
        std::fs::set_permissions(&guard.path, existing.permissions())?;
    }
    file.sync_all()?;
    drop(file);
    std::fs::rename(&guard.path, path)?;
    guard.armed = false;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}-{}", TEMP_PREFIX, uuid::Uuid::new_v4().simple(), name))
}
