use history_engine::BackupOrchestrator;
use std::future::Future;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Fires a full backup run on the cron schedule from the settings.
pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    current_job: Mutex<Option<Uuid>>,
    orchestrator: BackupOrchestrator,
    shutdown: CancellationToken,
    runs: TaskTracker,
}

impl BackupScheduler {
    /// Scheduled runs are tracked on `runs` so shutdown can wait for them.
    pub async fn new(
        orchestrator: BackupOrchestrator,
        shutdown: CancellationToken,
        runs: TaskTracker,
    ) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            current_job: Mutex::new(None),
            orchestrator,
            shutdown,
            runs,
        })
    }

    /// Check a five-field cron expression (minute hour day month weekday).
    pub fn validate(expression: &str) -> anyhow::Result<()> {
        let normalized = normalize(expression)?;
        Job::new_async(normalized.as_str(), |_uuid, _lock| Box::pin(async {}))?;
        Ok(())
    }

    /// Replace the scheduled job. `None` disables scheduled runs.
    pub async fn reschedule(&self, expression: Option<&str>) -> anyhow::Result<()> {
        let mut current = self.current_job.lock().await;
        let scheduler = self.scheduler.lock().await;

        if let Some(id) = current.take() {
            scheduler.remove(&id).await?;
        }

        let Some(expression) = expression else {
            tracing::info!("No cron schedule configured, scheduled backups disabled");
            return Ok(());
        };

        let normalized = normalize(expression)?;
        let orchestrator = self.orchestrator.clone();
        let shutdown = self.shutdown.clone();
        let runs = self.runs.clone();

        let job = Job::new_async(normalized.as_str(), move |_uuid, _lock| {
            Box::pin(scheduled_run(orchestrator.clone(), shutdown.clone(), &runs))
        })?;

        *current = Some(scheduler.add(job).await?);
        tracing::info!(cron = %expression, "Backup schedule armed");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

fn scheduled_run(
    orchestrator: BackupOrchestrator,
    shutdown: CancellationToken,
    runs: &TaskTracker,
) -> impl Future<Output = ()> + Send + 'static {
    runs.track_future(async move {
        if shutdown.is_cancelled() {
            return;
        }
        tracing::info!("Starting scheduled backup");
        let report = orchestrator.trigger_all(&shutdown).await;
        for warning in &report.warnings {
            tracing::warn!(warning = %warning, "Scheduled backup warning");
        }
    })
}

/// The job scheduler expects a leading seconds field; settings carry the
/// classic five-field form.
fn normalize(expression: &str) -> anyhow::Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        anyhow::bail!(
            "expected 5 fields (minute hour day-of-month month day-of-week), found {}",
            fields.len()
        );
    }
    Ok(format!("0 {}", fields.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::TestApp;
    use history_engine::settings::TrackedConfig;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize("  0   3 * * 1 ").unwrap(), "0 0 3 * * 1");
        assert!(normalize("* * * *").is_err());
        assert!(normalize("0 0 3 * * 1").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(BackupScheduler::validate("0 */6 * * *").is_ok());
        assert!(BackupScheduler::validate("61 * * * *").is_err());
        assert!(BackupScheduler::validate("not a cron").is_err());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_scheduled_run() {
        let app = TestApp::new(vec![TrackedConfig::single("Configuration", "configuration.yaml")]).await;
        app.write("configuration.yaml", "a: 1\n");

        let runs = TaskTracker::new();
        tokio::spawn(scheduled_run(app.state.orchestrator.clone(), app.state.shutdown.clone(), &runs));
        runs.close();
        runs.wait().await;

        let backups = app
            .state
            .orchestrator
            .list_backups("configuration.yaml", "configuration.yaml")
            .await
            .unwrap();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_run_after_shutdown_does_nothing() {
        let app = TestApp::new(vec![TrackedConfig::single("Configuration", "configuration.yaml")]).await;
        app.write("configuration.yaml", "a: 1\n");
        app.state.shutdown.cancel();

        let runs = TaskTracker::new();
        scheduled_run(app.state.orchestrator.clone(), app.state.shutdown.clone(), &runs).await;

        let backups = app
            .state
            .orchestrator
            .list_backups("configuration.yaml", "configuration.yaml")
            .await
            .unwrap();
        assert!(backups.is_empty());
    }
}
