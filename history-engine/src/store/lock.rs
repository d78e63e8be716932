use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::utils::errors::{EngineError, Result};

/// One async mutex per tracked config path.
///
/// Snapshot, prune, restore and delete on a path are serialized; different
/// paths never wait on each other.
#[derive(Debug)]
pub struct PathLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    wait: Duration,
}

/// Held while a path is being written. Released on drop.
#[derive(Debug)]
pub struct PathGuard {
    path: String,
    _guard: OwnedMutexGuard<()>,
}

impl PathGuard {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl PathLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            wait,
        }
    }

    /// Wait for the lock on `path`, failing with a concurrency conflict
    /// after the configured wait.
    pub async fn acquire(&self, path: &str) -> Result<PathGuard> {
        let lock = Arc::clone(self.locks.entry(path.to_string()).or_default().value());

        match tokio::time::timeout(self.wait, lock.lock_owned()).await {
            Ok(guard) => Ok(PathGuard {
                path: path.to_string(),
                _guard: guard,
            }),
            Err(_) => {
                tracing::warn!(path = %path, "Timed out waiting for path lock");
                Err(EngineError::ConcurrencyConflict(path.to_string()))
            }
        }
    }
}
