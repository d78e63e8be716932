//! Live change detection.
//!
//! Parent directories of tracked files are watched non-recursively, tracked
//! directories recursively. Events are collected for a short quiet period and
//! then mapped back to the configs they belong to, each of which is backed up
//! through the orchestrator under its path lock.

use history_engine::fs::io::TEMP_PREFIX;
use history_engine::settings::BackupType;
use history_engine::{AppSettings, BackupOrchestrator};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Live locations of the tracked configs.
#[derive(Debug, Default)]
struct WatchTargets {
    /// live file -> config paths
    files: HashMap<PathBuf, Vec<String>>,
    /// tracked directory -> config path
    trees: Vec<(PathBuf, String)>,
}

impl WatchTargets {
    fn from_settings(settings: &AppSettings) -> Self {
        let mut targets = Self::default();
        for (_, config) in settings.configs() {
            let live = config.live_path(&settings.home_assistant_config_dir);
            match config.backup_type {
                BackupType::Directory => targets.trees.push((live, config.path.clone())),
                BackupType::Single | BackupType::Multiple => {
                    targets.files.entry(live).or_default().push(config.path.clone())
                }
            }
        }
        targets
    }

    /// Config paths affected by a change to `changed`.
    fn resolve(&self, changed: &Path) -> Vec<String> {
        let is_temp = changed
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(TEMP_PREFIX));
        if is_temp {
            return Vec::new();
        }

        let mut hits: Vec<String> = self.files.get(changed).cloned().unwrap_or_default();
        hits.extend(
            self.trees
                .iter()
                .filter(|(root, _)| changed.starts_with(root))
                .map(|(_, path)| path.clone()),
        );
        hits
    }

    /// Directory -> whether it is watched recursively.
    fn watch_dirs(&self) -> BTreeMap<PathBuf, bool> {
        let mut dirs = BTreeMap::new();
        for file in self.files.keys() {
            if let Some(parent) = file.parent() {
                dirs.entry(parent.to_path_buf()).or_insert(false);
            }
        }
        for (root, _) in &self.trees {
            dirs.insert(root.clone(), true);
        }
        dirs
    }
}

struct Registration {
    watcher: RecommendedWatcher,
    watched: BTreeMap<PathBuf, bool>,
}

/// Backs up tracked configs as soon as their live content changes.
pub struct FileWatcher {
    registration: Mutex<Registration>,
    targets: Arc<RwLock<WatchTargets>>,
}

impl FileWatcher {
    /// Register watches for the current settings and start dispatching events.
    ///
    /// The dispatch task lives on `runs` and stops once `shutdown` fires.
    pub fn start(
        orchestrator: BackupOrchestrator,
        shutdown: CancellationToken,
        runs: &TaskTracker,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "File watcher error"),
            },
            notify::Config::default(),
        )?;

        let this = Self {
            registration: Mutex::new(Registration {
                watcher,
                watched: BTreeMap::new(),
            }),
            targets: Arc::new(RwLock::new(WatchTargets::default())),
        };
        this.refresh(&orchestrator.settings());

        runs.spawn(dispatch(rx, Arc::clone(&this.targets), orchestrator, shutdown));
        Ok(this)
    }

    /// Re-register watches after the set of tracked configs changed.
    pub fn refresh(&self, settings: &AppSettings) {
        let targets = WatchTargets::from_settings(settings);
        let wanted = targets.watch_dirs();

        let mut guard = self.registration.lock().unwrap_or_else(PoisonError::into_inner);
        let registration = &mut *guard;

        let stale: Vec<PathBuf> = registration
            .watched
            .iter()
            .filter(|(dir, recursive)| wanted.get(*dir) != Some(*recursive))
            .map(|(dir, _)| dir.clone())
            .collect();
        for dir in stale {
            if let Err(e) = registration.watcher.unwatch(&dir) {
                tracing::debug!(dir = %dir.display(), error = %e, "Unwatch failed");
            }
            registration.watched.remove(&dir);
        }

        for (dir, recursive) in wanted {
            if registration.watched.contains_key(&dir) {
                continue;
            }
            let mode = if recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            match registration.watcher.watch(&dir, mode) {
                Ok(()) => {
                    registration.watched.insert(dir, recursive);
                }
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Cannot watch directory"),
            }
        }

        *self.targets.write().unwrap_or_else(PoisonError::into_inner) = targets;
        tracing::info!(directories = registration.watched.len(), "File watches registered");
    }
}

async fn dispatch(
    mut events: mpsc::UnboundedReceiver<PathBuf>,
    targets: Arc<RwLock<WatchTargets>>,
    orchestrator: BackupOrchestrator,
    shutdown: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(path) => path,
                None => break,
            },
        };

        // editors write in bursts; wait until they are done
        let mut changed = vec![first];
        let quiet = tokio::time::sleep(QUIET_PERIOD);
        tokio::pin!(quiet);
        loop {
            tokio::select! {
                _ = &mut quiet => break,
                event = events.recv() => match event {
                    Some(path) => changed.push(path),
                    None => break,
                },
            }
        }

        let configs: BTreeSet<String> = {
            let targets = targets.read().unwrap_or_else(PoisonError::into_inner);
            changed.iter().flat_map(|p| targets.resolve(p)).collect()
        };

        for path in configs {
            if shutdown.is_cancelled() {
                return;
            }
            match orchestrator.trigger_config(&path).await {
                Ok(stats) => {
                    if stats.snapshots > 0 {
                        tracing::info!(path = %path, snapshots = stats.snapshots, pruned = stats.pruned, "Change detected, backed up");
                    }
                    for warning in &stats.warnings {
                        tracing::warn!(path = %path, warning = %warning, "Change backup warning");
                    }
                }
                Err(e) if e.is_missing_path() => {
                    tracing::debug!(path = %path, "Tracked file removed, nothing to back up");
                }
                Err(e) => tracing::warn!(path = %path, error = %e, "Change backup failed"),
            }
        }
    }
    tracing::debug!("File watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::TestApp;
    use history_engine::settings::{ConfigGroup, TrackedConfig};

    async fn wait_for_backups(app: &TestApp, path: &str, id: &str, count: usize) -> usize {
        let mut seen = 0;
        for _ in 0..100 {
            seen = app.state.orchestrator.list_backups(path, id).await.unwrap().len();
            if seen >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        seen
    }

    #[test]
    fn test_resolve_targets() {
        let mut settings = AppSettings {
            home_assistant_config_dir: PathBuf::from("/config"),
            ..AppSettings::default()
        };
        settings.config_groups = vec![ConfigGroup::new(
            "Test",
            vec![
                TrackedConfig::single("Configuration", "configuration.yaml"),
                TrackedConfig::multiple("Automations", "automations.yaml", "id", "alias"),
                TrackedConfig::directory("ESP Home", "esphome", &["*.yaml"], &[]),
            ],
        )];
        let targets = WatchTargets::from_settings(&settings);

        assert_eq!(targets.resolve(Path::new("/config/automations.yaml")), vec!["automations.yaml"]);
        assert_eq!(targets.resolve(Path::new("/config/esphome/sub/node.yaml")), vec!["esphome"]);
        assert!(targets.resolve(Path::new("/config/secrets.yaml")).is_empty());
        assert!(targets
            .resolve(Path::new("/config/.tmp-0a1b-configuration.yaml"))
            .is_empty());

        let dirs = targets.watch_dirs();
        assert_eq!(dirs.get(Path::new("/config")), Some(&false));
        assert_eq!(dirs.get(Path::new("/config/esphome")), Some(&true));
        assert_eq!(dirs.len(), 2);
    }

    #[tokio::test]
    async fn test_change_is_backed_up() {
        let app = TestApp::new(vec![TrackedConfig::single("Configuration", "configuration.yaml")]).await;
        app.write("configuration.yaml", "a: 1\n");

        let runs = TaskTracker::new();
        let watcher = FileWatcher::start(app.state.orchestrator.clone(), app.state.shutdown.clone(), &runs).unwrap();

        app.write("configuration.yaml", "a: 2\n");
        assert_eq!(wait_for_backups(&app, "configuration.yaml", "configuration.yaml", 1).await, 1);
        let backups = app
            .state
            .orchestrator
            .list_backups("configuration.yaml", "configuration.yaml")
            .await
            .unwrap();
        let content = app
            .state
            .orchestrator
            .read_backup("configuration.yaml", "configuration.yaml", &backups[0].filename)
            .await
            .unwrap();
        assert_eq!(content, "a: 2\n");

        app.state.shutdown.cancel();
        runs.close();
        runs.wait().await;
        drop(watcher);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_configs() {
        let app = TestApp::new(vec![TrackedConfig::single("Configuration", "configuration.yaml")]).await;
        app.write("packages/lights.yaml", "light: []\n");

        let runs = TaskTracker::new();
        let watcher = FileWatcher::start(app.state.orchestrator.clone(), app.state.shutdown.clone(), &runs).unwrap();

        let mut settings = app.state.orchestrator.settings().as_ref().clone();
        settings.config_groups[0]
            .configs
            .push(TrackedConfig::single("Lights", "packages/lights.yaml"));
        let update = app.state.orchestrator.apply_settings(settings).await.unwrap();
        watcher.refresh(&update.settings);

        app.write("packages/lights.yaml", "light:\n  - platform: group\n");
        assert_eq!(wait_for_backups(&app, "packages/lights.yaml", "packages/lights.yaml", 1).await, 1);

        app.state.shutdown.cancel();
        runs.close();
        runs.wait().await;
    }
}
