//! Backup orchestration.
//!
//! A run walks every tracked config on a bounded pool of tasks. Each config
//! is processed sequentially under its path lock: capture, compare against
//! the last known hash, store, prune. Read paths (listing, diffs) go straight
//! to the store and never take the lock.

mod read;
mod report;
mod restore;
mod update;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineOptions;
use crate::diff::DiffEngine;
use crate::fs::IoPolicy;
use crate::hasher::{Capture, ContentHasher};
use crate::retention::{self, RetentionLimits};
use crate::settings::{AppSettings, SettingsStore, TrackedConfig};
use crate::store::{BackupStore, HistoryMeta, PathGuard, PathLocks};
use crate::utils::errors::Result;

pub use read::{ConfigMetadata, LIVE, PREVIOUS};
pub use report::{ConfigStats, Outcome, RunReport};
pub use update::SettingsUpdate;

#[derive(Clone)]
pub struct BackupOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    settings: SettingsStore,
    options: EngineOptions,
    io: IoPolicy,
    locks: Arc<PathLocks>,
    diff: DiffEngine,
    // serializes settings updates
    update: Mutex<()>,
}

impl BackupOrchestrator {
    pub fn new(settings: SettingsStore, options: EngineOptions) -> Self {
        let io = IoPolicy::from_options(&options);
        Self {
            inner: Arc::new(Inner {
                settings,
                io,
                locks: Arc::new(PathLocks::new(options.io_timeout())),
                diff: DiffEngine::from_options(&options),
                update: Mutex::new(()),
                options,
            }),
        }
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.inner.settings.current()
    }

    fn store(&self, settings: &AppSettings) -> BackupStore {
        BackupStore::new(&settings.backup_dir, self.inner.io, Arc::clone(&self.inner.locks))
    }

    fn hasher(&self, settings: &AppSettings) -> ContentHasher {
        ContentHasher::new(&settings.home_assistant_config_dir, self.inner.io)
    }

    /// Back up every tracked config whose content changed since its last backup.
    ///
    /// Configs not yet started when `cancel` fires are skipped; configs in
    /// progress finish their current pipeline.
    pub async fn trigger_all(&self, cancel: &CancellationToken) -> RunReport {
        let settings = self.settings();
        let configs: Vec<TrackedConfig> = settings.configs().map(|(_, c)| c.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(self.inner.options.max_concurrency.max(1)));

        info!(configs = configs.len(), concurrency = self.inner.options.max_concurrency, "Starting backup run");

        let mut handles = Vec::with_capacity(configs.len());
        for config in configs {
            let sem = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let settings = Arc::clone(&settings);
            let this = self.clone();
            let path = config.path.clone();

            let handle = tokio::spawn(async move {
                if cancel.is_cancelled() {
                    return Outcome::Skipped;
                }
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Outcome::Skipped,
                    permit = sem.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return Outcome::Skipped,
                    },
                };

                let outcome = match this.process(&settings, &config).await {
                    Ok(stats) => Outcome::Processed(stats),
                    Err(e) => {
                        warn!(path = %config.path, error = %e, "Config backup failed");
                        Outcome::Failed(e)
                    }
                };
                drop(permit);
                outcome
            });
            handles.push((path, handle));
        }

        let mut report = RunReport::default();
        for (path, handle) in handles {
            match handle.await {
                Ok(outcome) => report.record(&path, outcome),
                Err(e) => {
                    report.configs += 1;
                    report.skipped += 1;
                    report.warnings.push(format!("{path}: backup task failed: {e}"));
                }
            }
        }

        info!(summary = %report.summary(), warnings = report.warnings.len(), "Backup run finished");
        report
    }

    /// Back up a single tracked config now, e.g. after its live file changed.
    pub async fn trigger_config(&self, path: &str) -> Result<ConfigStats> {
        let settings = self.settings();
        let config = read::find_config(&settings, path)?.clone();
        self.process(&settings, &config).await
    }

    /// One config: capture, compare, store, prune. Holds the path lock throughout.
    async fn process(&self, settings: &AppSettings, config: &TrackedConfig) -> Result<ConfigStats> {
        let store = self.store(settings);
        let guard = store.lock(&config.path).await?;
        let captures = self.hasher(settings).capture(config).await?;
        let limits = settings.limits_for(config);

        let mut stats = ConfigStats::default();
        for capture in captures {
            let meta = HistoryMeta {
                path: config.path.clone(),
                id: capture.id.clone(),
                friendly_name: capture.friendly_name.clone(),
                backup_type: config.backup_type,
            };
            match self.snapshot(&store, &guard, &meta, capture, limits).await {
                Ok(Some(pruned)) => {
                    stats.snapshots += 1;
                    stats.pruned += pruned;
                }
                Ok(None) => stats.unchanged += 1,
                Err(e) => {
                    warn!(path = %meta.path, id = %meta.id, error = %e, "Snapshot failed");
                    stats.warnings.push(format!("{}/{}: {e}", meta.path, meta.id));
                }
            }
        }
        Ok(stats)
    }

    /// Store `capture` if it differs from the head of its history, then prune.
    /// Returns the number of pruned records, or `None` when nothing changed.
    async fn snapshot(
        &self,
        store: &BackupStore,
        guard: &PathGuard,
        meta: &HistoryMeta,
        capture: Capture,
        limits: RetentionLimits,
    ) -> Result<Option<usize>> {
        if store.last_hash(meta).await?.as_ref() == Some(&capture.fingerprint) {
            return Ok(None);
        }

        let record = store
            .create(guard, meta, &capture.content, &capture.fingerprint, Utc::now())
            .await?;
        info!(
            path = %meta.path,
            id = %meta.id,
            name = %meta.friendly_name,
            filename = %record.filename,
            "Config changed, saved backup"
        );

        let records = store.list(&meta.path, &meta.id).await?;
        let doomed = retention::select_for_deletion(&records, meta.backup_type, limits, Utc::now());
        for record in &doomed {
            store
                .delete(guard, &meta.path, &meta.id, &record.filename)
                .await?;
        }
        Ok(Some(doomed.len()))
    }
}
