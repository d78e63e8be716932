use crate::services::backup_scheduler::BackupScheduler;
use crate::services::file_watcher::FileWatcher;
use history_engine::BackupOrchestrator;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub orchestrator: BackupOrchestrator,
    pub scheduler: Arc<BackupScheduler>,
    /// Absent when the platform watcher could not be created
    pub watcher: Option<Arc<FileWatcher>>,
    pub shutdown: CancellationToken,
    pub started: Instant,
}

impl AppState {
    pub fn new(
        orchestrator: BackupOrchestrator,
        scheduler: Arc<BackupScheduler>,
        watcher: Option<Arc<FileWatcher>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            watcher,
            shutdown,
            started: Instant::now(),
        }
    }
}
