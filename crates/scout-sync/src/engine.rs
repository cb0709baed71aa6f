//! The sync engine: discovery loop and per-instance connection tasks.
//!
//! Every discovery tick reconciles the task set against the provider's
//! answer. New ports get an instance record and a connection task; ports
//! that vanish get cancelled and removed from the store (their sessions
//! stay — latest known truth with no live owner). A connection task that
//! gave up is reaped on the next tick and respawned with a fresh attempt
//! counter as long as discovery still observes the port.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use scout_core::model::{ConnectionState, Instance};
use scout_store::StateStore;

use crate::connection::{ConnectionConfig, InstanceConnection};
use crate::discovery::{DiscoverOptions, DiscoveredInstance, DiscoveryProvider};

/// Engine behavior knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between discovery passes.
    pub discovery_interval: Duration,
    /// Options handed to the discovery provider.
    pub discover_options: DiscoverOptions,
    /// Per-instance connection behavior.
    pub connection: ConnectionConfig,
    /// Time between fine-cell TTL sweeps.
    pub cell_sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(5),
            discover_options: DiscoverOptions::default(),
            connection: ConnectionConfig::default(),
            cell_sweep_interval: Duration::from_secs(30),
        }
    }
}

struct InstanceTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the discovery loop and all connection tasks.
pub struct SyncEngine {
    store: Arc<StateStore>,
    client: reqwest::Client,
    config: EngineConfig,
    token: CancellationToken,
    tasks: Mutex<HashMap<u16, InstanceTask>>,
}

impl SyncEngine {
    /// Start the engine. Must be called on a tokio runtime; the discovery
    /// and sweep loops are spawned immediately.
    #[must_use]
    pub fn start(
        store: Arc<StateStore>,
        provider: Arc<dyn DiscoveryProvider>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            store,
            client: reqwest::Client::new(),
            config,
            token: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        });
        let _ = tokio::spawn(Arc::clone(&engine).discovery_loop(provider));
        let _ = tokio::spawn(Arc::clone(&engine).sweep_loop());
        engine
    }

    /// The store this engine feeds.
    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Stop everything: discovery, sweeps, and every connection task.
    /// Synchronous; the store is left with every instance disconnected.
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            return;
        }
        info!("sync engine shutting down");
        self.token.cancel();
        let mut tasks = self.tasks.lock();
        for (_, task) in tasks.drain() {
            task.token.cancel();
        }
        drop(tasks);
        self.store.mark_all_disconnected();
    }

    /// Whether [`SyncEngine::shutdown`] ran.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn discovery_loop(self: Arc<Self>, provider: Arc<dyn DiscoveryProvider>) {
        let mut tick = interval(self.config.discovery_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = self.token.cancelled() => break,
                _ = tick.tick() => {}
            }
            let found = provider.discover(&self.config.discover_options).await;
            debug!(provider = provider.name(), found = found.len(), "discovery pass");
            self.reconcile(&found);
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.cell_sweep_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = self.token.cancelled() => break,
                _ = tick.tick() => {}
            }
            let evicted = self.store.evict_idle_cells();
            if evicted > 0 {
                debug!(evicted, "fine-cell sweep");
            }
        }
    }

    fn reconcile(&self, found: &[DiscoveredInstance]) {
        if self.token.is_cancelled() {
            return;
        }
        let now = Utc::now().timestamp_millis();
        let found_ports: HashSet<u16> = found.iter().map(|i| i.port).collect();
        let mut tasks = self.tasks.lock();

        // Reap finished tasks (gave up or crashed); if the port is still
        // observed, a fresh task takes over below.
        tasks.retain(|_, task| !task.handle.is_finished());

        for discovered in found {
            if self.store.instance(discovered.port).is_none() {
                self.store.upsert_instance(Instance {
                    port: discovered.port,
                    pid: discovered.pid,
                    directory: discovered.directory.clone(),
                    state: ConnectionState::Connecting,
                    last_seen: now,
                });
            } else {
                self.store.touch_instance(
                    discovered.port,
                    discovered.pid,
                    &discovered.directory,
                    now,
                );
            }
            if let Some(project) = &discovered.project {
                self.store.upsert_project(project.clone());
            }
            if !tasks.contains_key(&discovered.port) {
                info!(port = discovered.port, "instance discovered, connecting");
                let token = self.token.child_token();
                let connection = InstanceConnection::new(
                    discovered.port,
                    Arc::clone(&self.store),
                    self.client.clone(),
                    self.config.connection,
                    token.clone(),
                );
                let handle = tokio::spawn(connection.run());
                let _ = tasks.insert(discovered.port, InstanceTask { token, handle });
            }
        }

        let gone: Vec<u16> = tasks.keys().filter(|p| !found_ports.contains(p)).copied().collect();
        for port in gone {
            info!(port, "instance disappeared, tearing down");
            if let Some(task) = tasks.remove(&port) {
                task.token.cancel();
            }
            self.store.remove_instance(port);
        }
    }
}
