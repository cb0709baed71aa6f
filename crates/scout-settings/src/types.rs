//! Settings schema.
//!
//! Every struct deserializes from camelCase JSON with per-field defaults, so
//! a partial settings file only overrides what it names. Defaults are the
//! production values; [`ScoutSettings::validate`] clamps values that would
//! make the engine misbehave rather than rejecting the file.

use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoutSettings {
    /// Settings schema version.
    pub version: String,
    /// Instance discovery.
    pub discovery: DiscoverySettings,
    /// Per-instance connection behavior.
    pub connection: ConnectionSettings,
    /// Store behavior.
    pub store: StoreSettings,
    /// Logging and metrics.
    pub telemetry: TelemetrySettings,
}

impl Default for ScoutSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            discovery: DiscoverySettings::default(),
            connection: ConnectionSettings::default(),
            store: StoreSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

/// Discovery knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoverySettings {
    /// Milliseconds between discovery passes.
    pub interval_ms: u64,
    /// Per-candidate HTTP probe timeout, milliseconds.
    pub probe_timeout_ms: u64,
    /// Process name to match in the process table.
    pub process_name: String,
    /// Also list session ids during the probe.
    pub include_session_ids: bool,
    /// Surface full session records during the probe.
    pub include_session_details: bool,
    /// Surface project metadata from the probe.
    pub include_project: bool,
    /// Use a remote index endpoint instead of the process table.
    pub index_url: Option<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            probe_timeout_ms: 1_000,
            process_name: "opencode".to_string(),
            include_session_ids: false,
            include_session_details: false,
            include_project: true,
            index_url: None,
        }
    }
}

/// Connection knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Max stream silence before reconnecting, milliseconds.
    pub heartbeat_ms: u64,
    /// First reconnect delay, milliseconds.
    pub backoff_base_ms: u64,
    /// Reconnect delay cap, milliseconds.
    pub backoff_cap_ms: u64,
    /// Reconnect attempts before giving up until rediscovery.
    pub max_reconnect_attempts: u32,
    /// Reconnect at all.
    pub auto_reconnect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_ms: 60_000,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            max_reconnect_attempts: 10,
            auto_reconnect: true,
        }
    }
}

/// Store knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Idle TTL for fine-tier session cells, milliseconds.
    pub session_cell_ttl_ms: u64,
    /// Milliseconds between cell TTL sweeps.
    pub cell_sweep_interval_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { session_cell_ttl_ms: 300_000, cell_sweep_interval_ms: 30_000 }
    }
}

/// Logging and metrics knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Tracing env-filter directive, e.g. `info` or `scout_sync=debug,info`.
    pub log_filter: String,
    /// Serve Prometheus exposition on this port. `None` disables the endpoint.
    pub metrics_port: Option<u16>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self { log_filter: "info".to_string(), metrics_port: None }
    }
}

impl ScoutSettings {
    /// Clamp values that would make the engine misbehave. Logs each clamp.
    pub fn validate(&mut self) {
        if self.discovery.interval_ms < 250 {
            tracing::warn!(
                interval_ms = self.discovery.interval_ms,
                "discovery interval too small, clamping to 250ms"
            );
            self.discovery.interval_ms = 250;
        }
        if self.discovery.probe_timeout_ms < 50 {
            tracing::warn!(
                probe_timeout_ms = self.discovery.probe_timeout_ms,
                "probe timeout too small, clamping to 50ms"
            );
            self.discovery.probe_timeout_ms = 50;
        }
        if self.connection.heartbeat_ms < 1_000 {
            tracing::warn!(
                heartbeat_ms = self.connection.heartbeat_ms,
                "heartbeat too small, clamping to 1000ms"
            );
            self.connection.heartbeat_ms = 1_000;
        }
        if self.connection.backoff_cap_ms < self.connection.backoff_base_ms {
            tracing::warn!(
                base_ms = self.connection.backoff_base_ms,
                cap_ms = self.connection.backoff_cap_ms,
                "backoff cap below base, raising cap to base"
            );
            self.connection.backoff_cap_ms = self.connection.backoff_base_ms;
        }
        if self.store.session_cell_ttl_ms < 1_000 {
            tracing::warn!(
                session_cell_ttl_ms = self.store.session_cell_ttl_ms,
                "cell ttl too small, clamping to 1000ms"
            );
            self.store.session_cell_ttl_ms = 1_000;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let settings = ScoutSettings::default();
        assert_eq!(settings.version, "0.1.0");
        assert_eq!(settings.discovery.interval_ms, 5_000);
        assert_eq!(settings.discovery.process_name, "opencode");
        assert_eq!(settings.connection.heartbeat_ms, 60_000);
        assert_eq!(settings.connection.backoff_base_ms, 1_000);
        assert_eq!(settings.connection.backoff_cap_ms, 30_000);
        assert_eq!(settings.connection.max_reconnect_attempts, 10);
        assert!(settings.connection.auto_reconnect);
        assert_eq!(settings.store.session_cell_ttl_ms, 300_000);
        assert_eq!(settings.telemetry.log_filter, "info");
        assert!(settings.telemetry.metrics_port.is_none());
    }

    #[test]
    fn empty_json_yields_defaults() {
        let settings: ScoutSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ScoutSettings::default());
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let settings: ScoutSettings = serde_json::from_str(
            r#"{"connection": {"heartbeatMs": 15000}, "discovery": {"processName": "devserver"}}"#,
        )
        .unwrap();
        assert_eq!(settings.connection.heartbeat_ms, 15_000);
        assert_eq!(settings.connection.backoff_base_ms, 1_000);
        assert_eq!(settings.discovery.process_name, "devserver");
        assert_eq!(settings.discovery.interval_ms, 5_000);
    }

    #[test]
    fn serializes_camel_case_field_names() {
        let json = serde_json::to_value(ScoutSettings::default()).unwrap();
        assert!(json["discovery"]["intervalMs"].is_u64());
        assert!(json["discovery"]["probeTimeoutMs"].is_u64());
        assert!(json["connection"]["maxReconnectAttempts"].is_u64());
        assert!(json["store"]["sessionCellTtlMs"].is_u64());
        assert!(json["telemetry"]["logFilter"].is_string());
    }

    #[test]
    fn validate_clamps_degenerate_values() {
        let mut settings = ScoutSettings::default();
        settings.discovery.interval_ms = 1;
        settings.connection.heartbeat_ms = 10;
        settings.connection.backoff_base_ms = 5_000;
        settings.connection.backoff_cap_ms = 100;
        settings.store.session_cell_ttl_ms = 0;
        settings.validate();
        assert_eq!(settings.discovery.interval_ms, 250);
        assert_eq!(settings.connection.heartbeat_ms, 1_000);
        assert_eq!(settings.connection.backoff_cap_ms, 5_000);
        assert_eq!(settings.store.session_cell_ttl_ms, 1_000);
    }

    #[test]
    fn validate_leaves_sane_values_alone() {
        let mut settings = ScoutSettings::default();
        let before = settings.clone();
        settings.validate();
        assert_eq!(settings, before);
    }
}
