//! # scout
//!
//! Scout binary — discovers local backend server instances, syncs their
//! session state into one store, and exposes it as logs, JSON, or metrics.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scout::config;
use scout::telemetry;
use scout::{ConnectionState, EventOrigin, Instance, ScoutSettings, SessionHub, StateStore};
use scout_sync::bootstrap::{ApiClient, synthetic_events};

/// Scout session sync engine.
#[derive(Parser, Debug)]
#[command(name = "scout", about = "Session sync engine for local backend servers")]
struct Cli {
    /// Settings file (defaults to `$SCOUT_SETTINGS_PATH`, then `~/.scout/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run discovery and sync, logging world changes until interrupted.
    Watch {
        /// Serve Prometheus metrics on this port (overrides settings).
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Discover instances, read their state once, and print the world as JSON.
    Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings load before logging init: the log filter lives in settings.
    let (settings, settings_error) = match &cli.settings {
        Some(path) => (
            scout::load_settings_from_path(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None,
        ),
        None => match scout::load_settings() {
            Ok(settings) => (settings, None),
            Err(error) => (ScoutSettings::default(), Some(error)),
        },
    };
    telemetry::init_tracing(&settings.telemetry.log_filter);
    if let Some(error) = settings_error {
        warn!(%error, "settings load failed, using defaults");
    }

    match cli.command {
        Command::Watch { metrics_port } => watch(settings, metrics_port).await,
        Command::Snapshot => snapshot(settings).await,
    }
}

async fn watch(settings: ScoutSettings, metrics_port: Option<u16>) -> Result<()> {
    let handle = telemetry::install_recorder();
    let provider = config::discovery_provider(&settings);
    info!(provider = provider.name(), "starting sync");
    let hub = SessionHub::start(config::hub_config(&settings), provider, Vec::new()).await;

    let metrics_token = CancellationToken::new();
    let metrics_task = metrics_port
        .or(settings.telemetry.metrics_port)
        .map(|port| tokio::spawn(telemetry::serve_metrics(port, handle, metrics_token.clone())));

    let _summary = hub.subscribe(|world| {
        info!(
            connection = ?world.connection,
            instances = world.totals.instances,
            sessions = world.totals.sessions,
            running = world.totals.running,
            messages = world.totals.messages,
            "world changed"
        );
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    info!("shutting down");
    hub.dispose();
    metrics_token.cancel();
    if let Some(task) = metrics_task {
        task.await
            .context("metrics task panicked")?
            .context("metrics endpoint failed")?;
    }
    Ok(())
}

/// One-shot view: a single discovery pass, one bootstrap read per instance,
/// no live streams.
async fn snapshot(settings: ScoutSettings) -> Result<()> {
    let provider = config::discovery_provider(&settings);
    let options = config::discover_options(&settings);
    let store = Arc::new(StateStore::new());
    let client = reqwest::Client::new();

    for found in provider.discover(&options).await {
        store.upsert_instance(Instance {
            port: found.port,
            pid: found.pid,
            directory: found.directory.clone(),
            state: ConnectionState::Connected,
            last_seen: Utc::now().timestamp_millis(),
        });
        if let Some(project) = found.project {
            store.upsert_project(project);
        }

        let api = ApiClient::new(client.clone(), format!("http://127.0.0.1:{}", found.port));
        let mut boot = api.fetch_bootstrap().await;
        if let Some(project) = boot.project.take() {
            store.upsert_project(project);
        }
        let origin = EventOrigin::Instance(found.port);
        for event in synthetic_events(boot) {
            let _ = store.apply(origin, &event);
        }
    }

    let world = store.world_snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&world).context("failed to serialize snapshot")?
    );
    Ok(())
}
