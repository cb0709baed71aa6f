//! Sync-layer error types.

use std::time::Duration;

use thiserror::Error;

/// Failure on the event-stream transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP connection could not be established.
    #[error("connect failed: {0}")]
    Connect(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("event stream rejected with HTTP {0}")]
    Http(u16),
    /// No traffic (events or keep-alives) within the heartbeat window.
    #[error("no traffic for {0:?}, stream considered dead")]
    HeartbeatTimeout(Duration),
    /// The underlying SSE stream errored mid-flight.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Failure probing or reading an external source.
#[derive(Debug, Error)]
#[error("source {name} unavailable: {reason}")]
pub struct SourceError {
    /// Source name, as reported by the source itself.
    pub name: String,
    /// Human-readable reason.
    pub reason: String,
}

impl SourceError {
    /// Build a source error.
    #[must_use]
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { name: name.into(), reason: reason.into() }
    }
}
