//! # scout-core
//!
//! Foundation types, wire events, and retry policy for the Scout session engine.
//!
//! This crate provides the shared vocabulary that all other Scout crates depend on:
//!
//! - **Models**: [`model::Session`], [`model::Message`], [`model::Part`],
//!   [`model::Instance`], [`model::Project`] canonical entities
//! - **Statuses**: [`model::BackendStatus`] as reported on the wire,
//!   [`model::SessionStatus`] as derived for consumers
//! - **Events**: [`events::ServerEvent`] tagged union, frame decoding, and
//!   the unknown-kind / malformed-frame distinction
//! - **Errors**: [`error::EventError`] via `thiserror`
//! - **Retry**: [`retry::BackoffPolicy`] exponential backoff calculation
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other scout crates.

#![deny(unsafe_code)]

pub mod error;
pub mod events;
pub mod model;
pub mod retry;
