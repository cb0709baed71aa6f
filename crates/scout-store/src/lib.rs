//! # scout-store
//!
//! Canonical state store, event routing, and derived snapshots.
//!
//! The [`store::StateStore`] is the single mutation point for all session
//! state. Events flow in through [`store::StateStore::apply`] (which delegates
//! to the routing table in [`router`]), snapshots flow out through
//! [`snapshot::WorldSnapshot`] (coarse tier) and per-session watch cells
//! (fine tier, [`store::StateStore::subscribe_session`]).
//!
//! ## Crate Position
//!
//! Depends on `scout-core`. Depended on by `scout-sync` and `scout`.

#![deny(unsafe_code)]

mod cells;
pub mod cow;
pub mod metrics;
pub mod router;
pub mod snapshot;
pub mod store;

pub use snapshot::{DirectoryGroup, EnrichedMessage, EnrichedSession, WorldSnapshot, WorldTotals};
pub use store::{StateStore, SubscriptionGuard};
