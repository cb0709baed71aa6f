//! # scout-sync
//!
//! Everything between the backend servers and the store: discovery of
//! instances, the SSE transport, bootstrap reads, per-instance connection
//! lifecycle, the discovery-driven engine, and the [`facade::SessionHub`]
//! consumers actually hold.
//!
//! ## Crate Position
//!
//! Depends on `scout-core` and `scout-store`. Depended on by `scout`.

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod connection;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod facade;
pub mod transport;

pub use discovery::{DiscoverOptions, DiscoveredInstance, DiscoveryProvider};
pub use engine::{EngineConfig, SyncEngine};
pub use facade::{ExtraSource, HubConfig, SessionHub};
