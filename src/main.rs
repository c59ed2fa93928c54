// src/main.rs
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod cron_server;
mod keep_alive;
mod notify;
mod reconcile;
mod reconcile_guard;
mod scheduler;
mod shift_window;
mod worklog_data;
mod worklog_store;

use config::AppConfig;
use cron_server::AppState;
use keep_alive::KeepAliveService;
use notify::{run_notification_worker, InMemoryNotificationStore, QueueingNotifier, RetryPolicy};
use reconcile::WorklogReconciler;
use reconcile_guard::ReconcileGuard;
use scheduler::{run_heartbeat_job, run_reconcile_scheduler, Schedule};
use worklog_store::{
    load_directory_file, InMemoryDraftStore, InMemoryDurableStore, InMemoryUserDirectory,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting tracing subscriber failed")?;
    info!("Tracing subscriber initialized.");

    let config = Arc::new(
        AppConfig::from_env().context("Loading configuration from environment failed")?,
    );
    let run_at = config
        .run_at()
        .context("RECONCILE_AT is not a valid HH:MM time")?;
    let utc_offset = config
        .utc_offset()
        .context("RECONCILE_UTC_OFFSET_MINUTES is out of range")?;
    info!("App configuration loaded.");

    // A short secret fingerprint makes deploy mismatches diagnosable without
    // logging the secret itself.
    let fingerprint = hex::encode(&Sha256::digest(config.cron_secret.as_bytes())[..4]);
    info!("Cron secret loaded (fingerprint {fingerprint})");

    // --- Stores ---
    let directory = Arc::new(InMemoryUserDirectory::new());
    let drafts = Arc::new(InMemoryDraftStore::new());
    let durable = Arc::new(InMemoryDurableStore::new());
    if let Some(path) = &config.directory_file {
        match load_directory_file(path) {
            Ok(users) => {
                let count = users.len();
                directory
                    .add_all(users)
                    .context("Seeding the user directory failed")?;
                info!("Seeded {} directory users from {}", count, path);
            }
            Err(e) => warn!("Could not seed user directory from {}: {}", path, e),
        }
    }

    // --- Notification pipeline ---
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let (notifier, notification_rx) = QueueingNotifier::channel();
    tokio::spawn(run_notification_worker(
        notification_rx,
        notifications.clone(),
        RetryPolicy::default(),
    ));

    // --- Reconciliation engine and schedule ---
    let guard = ReconcileGuard::new();
    let reconciler = Arc::new(WorklogReconciler::new(
        directory.clone(),
        drafts.clone(),
        durable.clone(),
        Arc::new(notifier),
        guard.clone(),
    ));

    tokio::spawn(run_reconcile_scheduler(
        reconciler.clone(),
        Schedule { run_at, utc_offset },
    ));

    if config.enable_test_job {
        tokio::spawn(run_heartbeat_job(utc_offset));
    }

    if config.is_production() {
        match &config.keep_alive_url {
            Some(url) => {
                let interval = Duration::from_secs(config.keep_alive_interval_minutes * 60);
                match KeepAliveService::new(url, interval) {
                    Ok(service) => {
                        tokio::spawn(service.run());
                    }
                    Err(e) => warn!("Keep-alive service disabled: {}", e),
                }
            }
            None => info!("Keep-alive service disabled: KEEP_ALIVE_URL not set"),
        }
    }

    // --- HTTP surface ---
    let state = AppState {
        reconciler,
        guard,
        directory,
        drafts,
        durable,
        notifications,
        config: config.clone(),
        started_at: Instant::now(),
    };
    let app = cron_server::router(state);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Binding {addr} failed"))?;
    info!("Starting server on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
