//! Mapping from persisted settings to runtime configuration.
//!
//! Settings are plain numbers in a JSON file; the engine wants `Duration`s,
//! a backoff policy, and a discovery provider. The mapping lives here so the
//! binary and embedding consumers build identical engines from the same file.

use std::sync::Arc;
use std::time::Duration;

use scout_core::retry::BackoffPolicy;
use scout_settings::ScoutSettings;
use scout_sync::connection::ConnectionConfig;
use scout_sync::discovery::{IndexDiscovery, ProcessScanDiscovery};
use scout_sync::{DiscoverOptions, DiscoveryProvider, EngineConfig, HubConfig};

/// Full hub configuration from settings.
#[must_use]
pub fn hub_config(settings: &ScoutSettings) -> HubConfig {
    HubConfig {
        engine: engine_config(settings),
        cell_ttl: Some(Duration::from_millis(settings.store.session_cell_ttl_ms)),
    }
}

/// Engine configuration from settings.
#[must_use]
pub fn engine_config(settings: &ScoutSettings) -> EngineConfig {
    EngineConfig {
        discovery_interval: Duration::from_millis(settings.discovery.interval_ms),
        discover_options: discover_options(settings),
        connection: ConnectionConfig {
            heartbeat: Duration::from_millis(settings.connection.heartbeat_ms),
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(settings.connection.backoff_base_ms),
                max_delay: Duration::from_millis(settings.connection.backoff_cap_ms),
                max_attempts: settings.connection.max_reconnect_attempts,
            },
            auto_reconnect: settings.connection.auto_reconnect,
        },
        cell_sweep_interval: Duration::from_millis(settings.store.cell_sweep_interval_ms),
    }
}

/// Discovery options from settings.
#[must_use]
pub fn discover_options(settings: &ScoutSettings) -> DiscoverOptions {
    DiscoverOptions {
        probe_timeout: Duration::from_millis(settings.discovery.probe_timeout_ms),
        include_session_ids: settings.discovery.include_session_ids,
        include_session_details: settings.discovery.include_session_details,
        include_project: settings.discovery.include_project,
    }
}

/// Pick the discovery provider: a remote index when one is configured,
/// otherwise the local process scan.
#[must_use]
pub fn discovery_provider(settings: &ScoutSettings) -> Arc<dyn DiscoveryProvider> {
    match &settings.discovery.index_url {
        Some(url) => Arc::new(IndexDiscovery::new(url.clone())),
        None => Arc::new(ProcessScanDiscovery::new(
            settings.discovery.process_name.clone(),
        )),
    }
}
