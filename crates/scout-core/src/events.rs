//! Wire events emitted by backend instances.
//!
//! Each SSE frame carries a JSON wrapper `{"payload": {"type": ..., "properties": ...}}`.
//! Decoding is two-phase: [`decode_frame`] strips the wrapper into an
//! [`Envelope`] without interpreting the kind, then [`Envelope::parse`]
//! resolves it into a [`ServerEvent`]. The split matters because the two
//! failure modes are treated differently: a malformed frame is a decode error
//! (dropped with a counter), while a structurally valid envelope with an
//! unrecognized kind is forward-compatible traffic and is skipped silently.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::EventError;
use crate::model::{BackendStatus, Message, Part, Session};

/// Where an event came from. Routing-table writes only happen for
/// instance-origin events; external sources never own sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// A connected backend instance, identified by port.
    Instance(u16),
    /// A non-instance source merged in through the façade.
    External,
}

impl EventOrigin {
    /// The owning port, for instance-origin events.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match self {
            EventOrigin::Instance(port) => Some(*port),
            EventOrigin::External => None,
        }
    }
}

#[derive(Deserialize)]
struct Frame {
    payload: Envelope,
}

/// A structurally decoded frame: kind string plus uninterpreted properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The wire event kind, e.g. `session.created`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload, left opaque until [`Envelope::parse`].
    #[serde(default)]
    pub properties: Value,
}

/// Strip the `{"payload": ...}` wrapper from a raw SSE data field.
pub fn decode_frame(data: &str) -> Result<Envelope, EventError> {
    let frame: Frame = serde_json::from_str(data).map_err(EventError::Malformed)?;
    Ok(frame.payload)
}

/// Every event kind the engine acts on, tagged exactly as on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum ServerEvent {
    /// A session was created.
    #[serde(rename = "session.created")]
    SessionCreated {
        /// The new session.
        info: Session,
    },
    /// A session's metadata changed.
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// The updated session.
        info: Session,
    },
    /// A session was deleted.
    #[serde(rename = "session.deleted")]
    SessionDeleted {
        /// The deleted session (only the id is load-bearing).
        info: Session,
    },
    /// A message was created or changed.
    #[serde(rename = "message.updated")]
    MessageUpdated {
        /// The message.
        info: Message,
    },
    /// A message was removed.
    #[serde(rename = "message.removed")]
    MessageRemoved {
        /// Owning session.
        #[serde(rename = "sessionID")]
        session_id: String,
        /// The removed message.
        #[serde(rename = "messageID")]
        message_id: String,
    },
    /// A part was created or changed (fires per streaming delta).
    #[serde(rename = "message.part.updated")]
    PartUpdated {
        /// The part, in full.
        part: Part,
        /// The streaming fragment that produced this update, when the server
        /// sent one. The part already carries the accumulated text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },
    /// A part was removed.
    #[serde(rename = "message.part.removed")]
    PartRemoved {
        /// Owning session.
        #[serde(rename = "sessionID")]
        session_id: String,
        /// Owning message.
        #[serde(rename = "messageID")]
        message_id: String,
        /// The removed part.
        #[serde(rename = "partID")]
        part_id: String,
    },
    /// Explicit status report for a session.
    #[serde(rename = "session.status")]
    SessionStatus {
        /// The session.
        #[serde(rename = "sessionID")]
        session_id: String,
        /// Reported status. Absent means idle.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<BackendStatus>,
    },
    /// The session finished its turn.
    #[serde(rename = "session.idle")]
    SessionIdle {
        /// The session.
        #[serde(rename = "sessionID")]
        session_id: String,
    },
    /// The session's turn failed.
    #[serde(rename = "session.error")]
    SessionError {
        /// The session, when the backend attributes the error to one.
        #[serde(default, rename = "sessionID", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Opaque error payload.
        #[serde(default)]
        error: Value,
    },
    /// The session's history was compacted. Reserved; no state mutation.
    #[serde(rename = "session.compacted")]
    SessionCompacted {
        /// The session.
        #[serde(rename = "sessionID")]
        session_id: String,
    },
    /// A workspace diff is available. Reserved; no state mutation.
    #[serde(rename = "session.diff")]
    SessionDiff {
        /// The session.
        #[serde(rename = "sessionID")]
        session_id: String,
        /// Opaque diff payload.
        #[serde(default)]
        diff: Value,
    },
}

/// Wire kind strings [`Envelope::parse`] resolves. Anything else is skipped
/// as forward-compatible traffic.
pub const KNOWN_KINDS: &[&str] = &[
    "session.created",
    "session.updated",
    "session.deleted",
    "message.updated",
    "message.removed",
    "message.part.updated",
    "message.part.removed",
    "session.status",
    "session.idle",
    "session.error",
    "session.compacted",
    "session.diff",
];

impl ServerEvent {
    /// The wire kind string for this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::SessionDeleted { .. } => "session.deleted",
            ServerEvent::MessageUpdated { .. } => "message.updated",
            ServerEvent::MessageRemoved { .. } => "message.removed",
            ServerEvent::PartUpdated { .. } => "message.part.updated",
            ServerEvent::PartRemoved { .. } => "message.part.removed",
            ServerEvent::SessionStatus { .. } => "session.status",
            ServerEvent::SessionIdle { .. } => "session.idle",
            ServerEvent::SessionError { .. } => "session.error",
            ServerEvent::SessionCompacted { .. } => "session.compacted",
            ServerEvent::SessionDiff { .. } => "session.diff",
        }
    }

    /// The session this event names, when it names one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerEvent::SessionCreated { info }
            | ServerEvent::SessionUpdated { info }
            | ServerEvent::SessionDeleted { info } => Some(&info.id),
            ServerEvent::MessageUpdated { info } => Some(&info.session_id),
            ServerEvent::PartUpdated { part, .. } => Some(&part.session_id),
            ServerEvent::MessageRemoved { session_id, .. }
            | ServerEvent::PartRemoved { session_id, .. }
            | ServerEvent::SessionStatus { session_id, .. }
            | ServerEvent::SessionIdle { session_id }
            | ServerEvent::SessionCompacted { session_id }
            | ServerEvent::SessionDiff { session_id, .. } => Some(session_id),
            ServerEvent::SessionError { session_id, .. } => session_id.as_deref(),
        }
    }
}

impl Envelope {
    /// Resolve the envelope into a typed event.
    ///
    /// Returns `Ok(None)` for kinds this engine does not know (skip, don't
    /// drop the connection) and `Err` when a known kind carries properties
    /// that do not validate.
    pub fn parse(&self) -> Result<Option<ServerEvent>, EventError> {
        if !KNOWN_KINDS.contains(&self.kind.as_str()) {
            return Ok(None);
        }
        let tagged = json!({ "type": self.kind, "properties": self.properties });
        let event = serde_json::from_value(tagged).map_err(EventError::Malformed)?;
        Ok(Some(event))
    }
}
