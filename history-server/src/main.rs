mod config;
mod error;
mod routes;
mod services;
mod state;

use crate::config::{bind_address, AppConfig};
use crate::services::backup_scheduler::BackupScheduler;
use crate::services::file_watcher::FileWatcher;
use crate::state::AppState;
use anyhow::Result;
use clap::Parser;
use history_engine::fs::IoPolicy;
use history_engine::{BackupOrchestrator, Config, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Parser, Debug)]
#[command(name = "history-server")]
#[command(about = "Versioned backups of Home Assistant configuration", long_about = None)]
struct Args {
    /// Path to the engine tuning file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the settings document (overrides SETTINGS_PATH)
    #[arg(short, long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Port to listen on (overrides the settings document)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = AppConfig::from_env();

    // Load engine configuration
    let config = match args.config.as_ref().or(env.engine_config.as_ref()) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Initialize logging
    let log_level = args
        .log_level
        .as_deref()
        .or(env.log_level.as_deref())
        .unwrap_or(&config.log.level);
    history_engine::utils::logger::init(log_level)?;

    let settings_path = args.settings.unwrap_or(env.settings_path);
    let settings = SettingsStore::load(&settings_path, IoPolicy::from_options(&config.engine)).await;
    let addr = bind_address(&settings.current().port, args.port.or(env.port));

    let orchestrator = BackupOrchestrator::new(settings, config.engine.clone());
    let cancel = CancellationToken::new();
    // every background backup run, so shutdown can wait for them
    let runs = TaskTracker::new();

    // Initialize cron scheduler
    let scheduler = Arc::new(BackupScheduler::new(orchestrator.clone(), cancel.clone(), runs.clone()).await?);
    if let Err(e) = scheduler.reschedule(orchestrator.settings().schedule()).await {
        tracing::warn!("Failed to initialize schedule: {}", e);
    }
    if let Err(e) = scheduler.start().await {
        tracing::warn!("Failed to start scheduler: {}", e);
    }

    let watcher = match FileWatcher::start(orchestrator.clone(), cancel.clone(), &runs) {
        Ok(watcher) => Some(Arc::new(watcher)),
        Err(e) => {
            tracing::warn!("File watcher unavailable, relying on scheduled runs: {}", e);
            None
        }
    };

    let state = Arc::new(AppState::new(orchestrator.clone(), scheduler.clone(), watcher, cancel.clone()));

    // Initial run so the listing reflects the live files from the start
    {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        runs.spawn(async move {
            let report = orchestrator.trigger_all(&cancel).await;
            for warning in &report.warnings {
                tracing::warn!(warning = %warning, "Startup backup warning");
            }
        });
    }

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        settings = %settings_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Listening on {}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }

    runs.close();
    if !runs.is_empty() {
        tracing::info!(runs = runs.len(), "Waiting for in-flight backups");
    }
    runs.wait().await;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
}
