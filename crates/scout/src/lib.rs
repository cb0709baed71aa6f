//! # scout
//!
//! Unified crate for the Scout session sync engine. Re-exports the public
//! surface of the workspace crates and adds the pieces only the full program
//! needs: settings-to-runtime config mapping and telemetry wiring.
//!
//! Library consumers usually want [`SessionHub`]; the `scout` binary in this
//! crate is a thin CLI over the same surface.

#![deny(unsafe_code)]

pub mod config;
pub mod telemetry;

pub use scout_core::events::{Envelope, EventOrigin, ServerEvent};
pub use scout_core::model::{
    ConnectionState, ConnectionStatus, Instance, Message, Part, Project, Session, SessionStatus,
};
pub use scout_core::retry::BackoffPolicy;
pub use scout_settings::{ScoutSettings, load_settings, load_settings_from_path, settings_path};
pub use scout_store::{
    DirectoryGroup, EnrichedMessage, EnrichedSession, StateStore, SubscriptionGuard,
    WorldSnapshot, WorldTotals,
};
pub use scout_sync::{
    DiscoverOptions, DiscoveredInstance, DiscoveryProvider, EngineConfig, ExtraSource, HubConfig,
    SessionHub, SyncEngine,
};
