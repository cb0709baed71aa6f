//! # scout-settings
//!
//! Configuration management with layered sources for the Scout engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`ScoutSettings::default()`]
//! 2. **User file** — `~/.scout/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `SCOUT_*` overrides (highest priority)
//!
//! The loaded value is plain data: callers pass it down explicitly rather
//! than reading a process-wide singleton, which keeps tests able to construct
//! independent engines side by side.
//!
//! # Usage
//!
//! ```no_run
//! use scout_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("discovery every {}ms", settings.discovery.interval_ms);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
