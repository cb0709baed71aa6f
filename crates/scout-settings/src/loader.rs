//! Layered settings loading: defaults ← user file ← environment.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use crate::errors::Result;
use crate::types::ScoutSettings;

/// Path of the user settings file: `$SCOUT_SETTINGS_PATH` if set, else
/// `~/.scout/settings.json`.
#[must_use]
pub fn settings_path() -> PathBuf {
    if let Ok(path) = std::env::var("SCOUT_SETTINGS_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".scout").join("settings.json")
}

/// Load settings from the default path with env overrides applied.
/// A missing file is not an error; the defaults simply stand.
pub fn load_settings() -> Result<ScoutSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from an explicit path, deep-merged over defaults, then
/// apply `SCOUT_*` env overrides and validate.
pub fn load_settings_from_path(path: &Path) -> Result<ScoutSettings> {
    let defaults = serde_json::to_value(ScoutSettings::default())?;
    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, user)
    } else {
        defaults
    };
    let mut settings: ScoutSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Recursively merge `overlay` over `base`. Objects merge key-by-key; any
/// other value in `overlay` replaces the base value outright.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn apply_env_overrides(settings: &mut ScoutSettings) {
    if let Some(value) = env_parse::<u64>("SCOUT_DISCOVERY_INTERVAL_MS") {
        settings.discovery.interval_ms = value;
    }
    if let Ok(value) = std::env::var("SCOUT_PROCESS_NAME") {
        settings.discovery.process_name = value;
    }
    if let Ok(value) = std::env::var("SCOUT_INDEX_URL") {
        settings.discovery.index_url = Some(value);
    }
    if let Some(value) = env_parse::<u64>("SCOUT_HEARTBEAT_MS") {
        settings.connection.heartbeat_ms = value;
    }
    if let Some(value) = env_parse::<u32>("SCOUT_MAX_RECONNECT_ATTEMPTS") {
        settings.connection.max_reconnect_attempts = value;
    }
    if let Some(value) = env_parse::<u64>("SCOUT_CELL_TTL_MS") {
        settings.store.session_cell_ttl_ms = value;
    }
    if let Ok(value) = std::env::var("SCOUT_LOG_FILTER") {
        settings.telemetry.log_filter = value;
    }
    if let Some(value) = env_parse::<u16>("SCOUT_METRICS_PORT") {
        settings.telemetry.metrics_port = Some(value);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, raw, "unparseable env override, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_nested_objects() {
        let base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 3});
        let overlay = serde_json::json!({"a": {"y": 9}});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["a"]["x"], 1);
        assert_eq!(merged["a"]["y"], 9);
        assert_eq!(merged["b"], 3);
    }

    #[test]
    fn deep_merge_scalar_replaces() {
        let merged = deep_merge(serde_json::json!({"a": [1, 2]}), serde_json::json!({"a": [3]}));
        assert_eq!(merged["a"], serde_json::json!([3]));
    }

    #[test]
    fn load_from_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"heartbeatMs": 20000}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.connection.heartbeat_ms, 20_000);
        assert_eq!(settings.discovery.interval_ms, 5_000);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, ScoutSettings::default());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn loaded_settings_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"discovery": {"intervalMs": 1}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.discovery.interval_ms, 250);
    }

    // Env mutation is unsafe in edition 2024; this test owns its variable
    // name so parallel tests cannot observe the transient value.
    #[test]
    #[allow(unsafe_code)]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"heartbeatMs": 20000}}"#).unwrap();
        unsafe { std::env::set_var("SCOUT_HEARTBEAT_MS", "45000") };
        let settings = load_settings_from_path(&path).unwrap();
        unsafe { std::env::remove_var("SCOUT_HEARTBEAT_MS") };
        assert_eq!(settings.connection.heartbeat_ms, 45_000);
    }
}
