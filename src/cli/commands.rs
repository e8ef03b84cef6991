//! CLI command implementations
//!
//! `start` follows a strict boot sequence: load and validate the bootstrap
//! config (fatal on failure), assemble the runtime state, spawn the config
//! source (file watcher or push client) and the reconciler, then serve
//! until a signal initiates graceful drain. `check` validates a document
//! and exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::admission::{Admission, AdmissionController};
use crate::circuit::{CircuitBreakerSet, CircuitGuard};
use crate::config::watcher::content_digest;
use crate::config::{
    validator, ConfigDocument, ConfigError, ConfigSource, ConfigStore, FileWatcher,
    SnapshotReader,
};
use crate::control_plane::PushClient;
use crate::health::{HealthMonitor, HealthView};
use crate::http_server::{AppState, HttpServer, ServerConfig};
use crate::observability::Logger;
use crate::proxy::ProxyEngine;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Dispatch a parsed command.
pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Start {
            config,
            port,
            control_plane_url,
        } => start(config, port, control_plane_url),
        Command::Check { config } => check(&config),
    }
}

/// Validate a document and report its version.
fn check(path: &Path) -> CliResult<()> {
    let bytes = std::fs::read(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let document = ConfigDocument::from_slice(&bytes)?;
    let snapshot = validator::validate(&document, ConfigSource::File, Utc::now())?;

    println!(
        "{}",
        serde_json::json!({
            "status": "ok",
            "version": snapshot.version,
            "placements": snapshot.placements.len(),
            "routing_keys": snapshot.routing_table.len(),
        })
    );
    Ok(())
}

/// Boot the data plane and serve until shutdown.
fn start(config_path: PathBuf, port: u16, control_plane_url: Option<String>) -> CliResult<()> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| CliError::Server(e.to_string()))?;
    runtime.block_on(run_data_plane(config_path, port, control_plane_url))
}

async fn run_data_plane(
    config_path: PathBuf,
    port: u16,
    control_plane_url: Option<String>,
) -> CliResult<()> {
    // Bootstrap config: a missing or invalid initial document is fatal
    let bytes = tokio::fs::read(&config_path)
        .await
        .map_err(|e| ConfigError::Io(format!("{}: {}", config_path.display(), e)))?;
    let document = ConfigDocument::from_slice(&bytes)?;
    let snapshot = validator::validate(&document, ConfigSource::File, Utc::now())?;
    Logger::info(
        "CONFIG_LOADED",
        &[
            ("path", &config_path.display().to_string()),
            ("version", &snapshot.version),
        ],
    );

    let store = Arc::new(ConfigStore::new(snapshot));
    let (shutdown_tx, _) = broadcast::channel(4);

    // Per-placement runtime state, reconciled on every publish
    let health = Arc::new(HealthMonitor::new(reqwest::Client::new()));
    let circuits = Arc::new(CircuitBreakerSet::new());
    let admission = Arc::new(AdmissionController::new());
    {
        let current = store.current();
        health.apply_snapshot(&current);
        circuits.apply_snapshot(&current);
        admission.apply_snapshot(&current);
    }
    tokio::spawn(reconcile_runtime_state(
        Arc::clone(&store),
        Arc::clone(&health),
        Arc::clone(&circuits),
        Arc::clone(&admission),
        shutdown_tx.subscribe(),
    ));

    // Config source: push mode when a control plane is configured,
    // file-watch hot-reload otherwise
    match &control_plane_url {
        Some(url) => {
            Logger::info("CONFIG_MODE", &[("mode", "push"), ("url", url)]);
            let client = PushClient::new(url.clone(), Arc::clone(&store));
            tokio::spawn(client.run(shutdown_tx.subscribe()));
        }
        None => {
            Logger::info(
                "CONFIG_MODE",
                &[("mode", "file_watch"), ("path", &config_path.display().to_string())],
            );
            let watcher = FileWatcher::new(
                config_path.clone(),
                Arc::clone(&store),
                Some(content_digest(&bytes)),
            );
            tokio::spawn(watcher.run(shutdown_tx.subscribe()));
        }
    }

    let engine = ProxyEngine::new(
        Arc::clone(&store) as Arc<dyn SnapshotReader>,
        Arc::clone(&health) as Arc<dyn HealthView>,
        Arc::clone(&circuits) as Arc<dyn CircuitGuard>,
        Arc::clone(&admission) as Arc<dyn Admission>,
    );
    let state = Arc::new(AppState {
        engine,
        store: Arc::clone(&store),
    });
    let server = HttpServer::new(ServerConfig::with_port(port), state);

    spawn_signal_listener(shutdown_tx.clone());

    let result = server
        .start(shutdown_tx.subscribe())
        .await
        .map_err(|e| CliError::Server(e.to_string()));

    health.shutdown();
    result
}

/// Reapply per-placement runtime state whenever a snapshot is published.
async fn reconcile_runtime_state(
    store: Arc<ConfigStore>,
    health: Arc<HealthMonitor>,
    circuits: Arc<CircuitBreakerSet>,
    admission: Arc<AdmissionController>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut events = store.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    health.apply_snapshot(&event.snapshot);
                    circuits.apply_snapshot(&event.snapshot);
                    admission.apply_snapshot(&event.snapshot);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Missed intermediate publishes; the latest wins anyway
                    let current = store.current();
                    health.apply_snapshot(&current);
                    circuits.apply_snapshot(&current);
                    admission.apply_snapshot(&current);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

/// Translate SIGINT/SIGTERM into the shutdown broadcast.
fn spawn_signal_listener(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut terminate = tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            )
            .expect("SIGTERM handler installation");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        Logger::info("SHUTDOWN_REQUESTED", &[]);
        let _ = shutdown_tx.send(());
    });
}
