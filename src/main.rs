// attentd - Attention tracking daemon
//
// Sensors (desktop focus watchers, browser extensions) POST a ping whenever
// they observe which application or site has the user's attention. The
// daemon coalesces those pings into non-overlapping time intervals and keeps
// them in SQLite for reporting.
//
// Architecture:
// - Server (axum): Ping ingestion and interval/usage reporting over HTTP
// - Tracker: Per-category ping queues, flushed into intervals in batches
// - Store: SQLite interval tables behind an r2d2 pool, versioned by migrations
// - Liveness marker: Detects an unclean previous shutdown so stale open
//   intervals get closed instead of extended

mod cli;
mod config;
mod liveness;
mod logging;
mod model;
mod server;
mod startup;
mod store;
mod tracker;

use anyhow::{Context, Result};
use config::Config;
use liveness::RunMarker;
use server::AppState;
use std::sync::Arc;
use store::IntervalStore;
use tracker::{LoggingObserver, Tracker};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI commands first (config --show, migrate, ...)
    // If a command was handled, exit early
    if cli::handle_cli() {
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let config = Config::from_env();

    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = logging::init(&config.logging);

    // Claim the liveness marker before touching the store: its presence tells
    // us whether the previous run ended without a final flush
    let (marker, prior) = RunMarker::acquire(&config.data_dir)
        .with_context(|| format!("Failed to claim liveness marker in {}", config.data_dir.display()))?;
    tracing::debug!("Liveness marker claimed at {}", marker.path().display());

    let db_path = config.db_path();
    let store = IntervalStore::open(&db_path, &config.storage.store_options())
        .with_context(|| format!("Failed to open interval store at {}", db_path.display()))?;
    let schema_version = store
        .schema_version()
        .context("Failed to read schema version")?;

    let mut tracker = Tracker::new(store, config.tracker.tracker_config(), prior)
        .context("Failed to initialize tracker")?;
    tracker.register(Arc::new(LoggingObserver::new()));
    let tracker = Arc::new(tracker);

    let info = startup::StartupInfo {
        config: &config,
        prior: &prior,
        generation: tracker.generation(),
        schema_version,
    };
    startup::print_startup(&info);
    startup::log_startup(&info);

    // Heartbeat: keep the marker fresh so a crash can be dated
    let marker = Arc::new(marker);
    let heartbeat_handle = {
        let marker = marker.clone();
        let period = config.tracker.heartbeat_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = marker.heartbeat() {
                    tracing::warn!("Heartbeat write failed: {:#}", e);
                }
            }
        })
    };

    // Create shutdown channel for graceful server shutdown
    // This is a oneshot channel - it can only send one signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut server_handle = tokio::spawn(server::start_server(
        config.bind_addr,
        AppState::new(tracker.clone()),
        shutdown_rx,
    ));

    // Run until Ctrl+C, or until the server stops on its own (e.g. bind failure)
    let server_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Shutting down...");

            // Stop accepting pings before the final flush
            // If the send fails, the server has already shut down (which is fine)
            let _ = shutdown_tx.send(());
            (&mut server_handle).await
        }
        result = &mut server_handle => result,
    };
    let server_result = server_result.context("Server task panicked")?;
    if let Err(e) = &server_result {
        tracing::error!("Server stopped: {:#}", e);
    }

    heartbeat_handle.abort();
    let _ = heartbeat_handle.await;

    // Final flush: close every open interval
    let flusher = tracker.clone();
    let flushed = tokio::task::spawn_blocking(move || flusher.shutdown())
        .await
        .context("Final flush task panicked")?;

    match flushed {
        Ok(reports) => {
            tracing::info!(
                pings = reports.iter().map(|r| r.pings).sum::<usize>(),
                "Final flush complete"
            );
            // Only a completed final flush counts as a clean shutdown
            match Arc::try_unwrap(marker) {
                Ok(marker) => marker.release().context("Failed to release liveness marker")?,
                Err(_) => tracing::warn!("Liveness marker still shared, leaving it in place"),
            }
        }
        Err(e) => {
            tracing::error!(
                "Final flush failed, next start will treat this run as unclean: {}",
                e
            );
        }
    }

    tracing::info!("Shutdown complete");
    server_result
}
