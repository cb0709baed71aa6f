//! Error types shared across the engine.

use thiserror::Error;

/// Failure to decode an event frame or envelope.
///
/// Unknown event kinds are deliberately NOT an error; see
/// [`crate::events::Envelope::parse`].
#[derive(Debug, Error)]
pub enum EventError {
    /// The frame or a known kind's properties failed to deserialize.
    #[error("malformed event frame: {0}")]
    Malformed(#[source] serde_json::Error),
}
