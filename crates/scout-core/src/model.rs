//! Canonical entity models for the session engine.
//!
//! These structs mirror the wire shapes the backend servers emit (camelCase
//! fields, `sessionID`-style id references) so the same types serve both
//! deserialization and the in-memory store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Creation/update timestamps carried by sessions and messages, in epoch ms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// When the record was created.
    #[serde(default)]
    pub created: i64,
    /// When the record was last updated.
    #[serde(default)]
    pub updated: i64,
}

/// Model identity attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    /// Provider identifier, e.g. `anthropic`.
    #[serde(default)]
    pub provider_id: String,
    /// Model identifier within the provider.
    #[serde(default)]
    pub model_id: String,
    /// Context window size in tokens, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_limit: Option<u64>,
}

/// A conversation session as reported by a backend instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id.
    pub id: String,
    /// Human-readable title (may be empty for fresh sessions).
    #[serde(default)]
    pub title: String,
    /// Working directory the session runs in.
    #[serde(default)]
    pub directory: String,
    /// Parent session id for sub-sessions.
    #[serde(default, rename = "parentID", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Creation/update timestamps.
    #[serde(default)]
    pub time: TimeRange,
    /// Model the session is bound to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages and parts
// ─────────────────────────────────────────────────────────────────────────────

/// Message author role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user turn.
    #[default]
    User,
    /// Model turn.
    Assistant,
    /// System-injected turn.
    System,
    /// Any role this engine does not model explicitly.
    #[serde(other)]
    Other,
}

/// Token usage reported by a backend for an assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub input: u64,
    /// Completion tokens.
    #[serde(default)]
    pub output: u64,
    /// Reasoning tokens, where the provider bills them separately.
    #[serde(default)]
    pub reasoning: u64,
}

impl TokenUsage {
    /// Total tokens attributed to the turn.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input + self.output + self.reasoning
    }
}

/// Message creation/completion timestamps, in epoch ms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTime {
    /// When the message was created.
    #[serde(default)]
    pub created: i64,
    /// When the message finished streaming, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<i64>,
}

/// A single message inside a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: String,
    /// Owning session.
    #[serde(rename = "sessionID")]
    pub session_id: String,
    /// Author role.
    #[serde(default)]
    pub role: Role,
    /// Creation/completion timestamps.
    #[serde(default)]
    pub time: MessageTime,
    /// Token usage, present on completed assistant turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    /// Cost in dollars, when the backend prices the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Typed content of a [`Part`], discriminated by the wire `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartBody {
    /// Plain text content.
    Text {
        /// The text, possibly still streaming.
        #[serde(default)]
        text: String,
    },
    /// Model reasoning content.
    Reasoning {
        /// Reasoning text.
        #[serde(default)]
        text: String,
    },
    /// A tool invocation and its lifecycle state.
    Tool {
        /// Provider call id.
        #[serde(default, rename = "callID")]
        call_id: String,
        /// Tool name.
        #[serde(default)]
        tool: String,
        /// Opaque tool state (pending/running/completed payloads).
        #[serde(default)]
        state: Value,
    },
    /// An attached file.
    File {
        /// MIME type.
        #[serde(default)]
        mime: String,
        /// Original filename, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        /// Where the file contents live.
        #[serde(default)]
        url: String,
    },
    /// Marks the start of an agent step.
    StepStart {},
    /// Marks the end of an agent step, with its usage.
    StepFinish {
        /// Token usage for the step.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens: Option<TokenUsage>,
        /// Step cost in dollars.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
    },
    /// A workspace snapshot reference.
    Snapshot {
        /// Snapshot identifier.
        #[serde(default)]
        snapshot: String,
    },
    /// A file-change patch produced by the turn.
    Patch {
        /// Patch content hash.
        #[serde(default)]
        hash: String,
        /// Files the patch touches.
        #[serde(default)]
        files: Vec<String>,
    },
    /// An agent hand-off marker.
    Agent {
        /// Agent name.
        #[serde(default)]
        name: String,
    },
    /// A provider retry notice.
    Retry {
        /// Retry attempt number.
        #[serde(default)]
        attempt: u32,
    },
    /// A context-compaction marker.
    Compaction {
        /// Whether the backend compacted automatically.
        #[serde(default)]
        auto: bool,
    },
    /// Any part type this engine does not model. Stored, never interpreted.
    #[serde(other)]
    Unknown,
}

impl Default for PartBody {
    fn default() -> Self {
        PartBody::Text { text: String::new() }
    }
}

/// A content part belonging to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Unique part id.
    pub id: String,
    /// Owning session.
    #[serde(rename = "sessionID")]
    pub session_id: String,
    /// Owning message.
    #[serde(rename = "messageID")]
    pub message_id: String,
    /// Typed content, discriminated by the wire `type` field.
    #[serde(flatten)]
    pub body: PartBody,
}

// ─────────────────────────────────────────────────────────────────────────────
// Statuses
// ─────────────────────────────────────────────────────────────────────────────

/// Session status as reported by a backend instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendStatus {
    /// Nothing in flight.
    Idle,
    /// A turn is executing.
    Busy,
    /// The backend is retrying a failed provider call.
    Retry {
        /// Attempt number.
        #[serde(default)]
        attempt: u32,
        /// Human-readable reason.
        #[serde(default)]
        message: String,
        /// Epoch ms of the next attempt.
        #[serde(default)]
        next: i64,
    },
}

impl BackendStatus {
    /// Collapse the wire status into the derived consumer-facing status.
    /// `retry` counts as running: work is still in flight.
    #[must_use]
    pub fn derived(&self) -> SessionStatus {
        match self {
            BackendStatus::Idle => SessionStatus::Idle,
            BackendStatus::Busy | BackendStatus::Retry { .. } => SessionStatus::Running,
        }
    }
}

/// Derived session status exposed to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A turn is executing (includes backend-side retries).
    Running,
    /// The last turn ended in an error.
    Error,
}

// ─────────────────────────────────────────────────────────────────────────────
// Instances and projects
// ─────────────────────────────────────────────────────────────────────────────

/// Connection lifecycle state of a single backend instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Discovered, connection being established (includes bootstrap).
    #[default]
    Connecting,
    /// Live event stream attached.
    Connected,
    /// Not currently connected; may be retried.
    Disconnected,
    /// Connection failed; reconnect pending or exhausted.
    Error,
}

/// Aggregate connection status across all known instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No instances found yet.
    #[default]
    Discovering,
    /// At least one instance is mid-handshake and none are live.
    Connecting,
    /// At least one instance has a live stream.
    Connected,
    /// Instances exist but none are connected or connecting.
    Disconnected,
    /// Every known instance is in the error state.
    Error,
}

/// A discovered backend server process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Local TCP port the instance listens on. Primary key.
    pub port: u16,
    /// OS process id, when discovery observed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Working directory the instance serves.
    #[serde(default)]
    pub directory: String,
    /// Connection lifecycle state.
    #[serde(default)]
    pub state: ConnectionState,
    /// Epoch ms of the last discovery observation.
    #[serde(default)]
    pub last_seen: i64,
}

impl Instance {
    /// Base URL for the instance's HTTP API.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// A project (working directory) aggregated across instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Absolute working directory. Primary key.
    pub directory: String,
    /// Display name, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Version-control system in use, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<String>,
}

impl Project {
    /// Merge another observation of the same project, preferring known fields.
    pub fn absorb(&mut self, other: &Project) {
        if self.name.is_none() {
            self.name = other.name.clone();
        }
        if self.vcs.is_none() {
            self.vcs = other.vcs.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_deserializes_wire_shape() {
        let session: Session = serde_json::from_value(json!({
            "id": "ses_01",
            "title": "fix the parser",
            "directory": "/home/u/proj",
            "parentID": "ses_00",
            "time": { "created": 100, "updated": 200 }
        }))
        .unwrap();
        assert_eq!(session.id, "ses_01");
        assert_eq!(session.parent_id.as_deref(), Some("ses_00"));
        assert_eq!(session.time.updated, 200);
    }

    #[test]
    fn session_tolerates_missing_optionals() {
        let session: Session = serde_json::from_value(json!({ "id": "ses_02" })).unwrap();
        assert!(session.title.is_empty());
        assert!(session.parent_id.is_none());
        assert!(session.model.is_none());
    }

    #[test]
    fn message_uses_capitalized_id_refs() {
        let message: Message = serde_json::from_value(json!({
            "id": "msg_01",
            "sessionID": "ses_01",
            "role": "assistant",
            "time": { "created": 5, "completed": 9 },
            "tokens": { "input": 10, "output": 20, "reasoning": 5 }
        }))
        .unwrap();
        assert_eq!(message.session_id, "ses_01");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.tokens.unwrap().total(), 35);
    }

    #[test]
    fn unknown_role_maps_to_other() {
        let message: Message = serde_json::from_value(json!({
            "id": "msg_02",
            "sessionID": "ses_01",
            "role": "compactor"
        }))
        .unwrap();
        assert_eq!(message.role, Role::Other);
    }

    #[test]
    fn part_body_discriminates_on_type() {
        let part: Part = serde_json::from_value(json!({
            "id": "prt_01",
            "sessionID": "ses_01",
            "messageID": "msg_01",
            "type": "tool",
            "callID": "call_9",
            "tool": "bash",
            "state": { "status": "running" }
        }))
        .unwrap();
        match part.body {
            PartBody::Tool { ref call_id, ref tool, .. } => {
                assert_eq!(call_id, "call_9");
                assert_eq!(tool, "bash");
            }
            ref other => panic!("expected tool part, got {other:?}"),
        }
    }

    #[test]
    fn part_body_kebab_case_tags() {
        let part: Part = serde_json::from_value(json!({
            "id": "prt_02",
            "sessionID": "ses_01",
            "messageID": "msg_01",
            "type": "step-finish",
            "tokens": { "input": 1, "output": 2, "reasoning": 0 }
        }))
        .unwrap();
        assert!(matches!(part.body, PartBody::StepFinish { tokens: Some(t), .. } if t.output == 2));
    }

    #[test]
    fn unrecognized_part_type_is_stored_as_unknown() {
        let part: Part = serde_json::from_value(json!({
            "id": "prt_03",
            "sessionID": "ses_01",
            "messageID": "msg_01",
            "type": "holographic-widget",
            "whatever": true
        }))
        .unwrap();
        assert_eq!(part.body, PartBody::Unknown);
    }

    #[test]
    fn backend_status_derives_consumer_status() {
        assert_eq!(BackendStatus::Idle.derived(), SessionStatus::Idle);
        assert_eq!(BackendStatus::Busy.derived(), SessionStatus::Running);
        let retry = BackendStatus::Retry { attempt: 2, message: "overloaded".into(), next: 99 };
        assert_eq!(retry.derived(), SessionStatus::Running);
    }

    #[test]
    fn backend_status_parses_tagged_retry() {
        let status: BackendStatus = serde_json::from_value(json!({
            "type": "retry",
            "attempt": 3,
            "message": "rate limited",
            "next": 1234
        }))
        .unwrap();
        assert_matches::assert_matches!(status, BackendStatus::Retry { attempt: 3, .. });
    }

    #[test]
    fn project_absorb_prefers_known_fields() {
        let mut a = Project { directory: "/a".into(), name: None, vcs: Some("git".into()) };
        let b = Project { directory: "/a".into(), name: Some("proj".into()), vcs: Some("hg".into()) };
        a.absorb(&b);
        assert_eq!(a.name.as_deref(), Some("proj"));
        assert_eq!(a.vcs.as_deref(), Some("git"));
    }

    #[test]
    fn instance_base_url() {
        let instance = Instance { port: 4056, ..Instance::default() };
        assert_eq!(instance.base_url(), "http://127.0.0.1:4056");
    }
}
