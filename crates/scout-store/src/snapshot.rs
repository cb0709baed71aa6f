//! Derived read models: enriched sessions and the world snapshot.
//!
//! Everything here is computed on demand from the canonical maps; nothing is
//! cached except through the fine-tier cells in [`crate::cells`]. Snapshots
//! are plain serializable values so the CLI can print them as JSON.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;

use scout_core::model::{
    ConnectionState, ConnectionStatus, Instance, Message, Part, Project, Role, Session,
    SessionStatus,
};

use crate::store::StateStore;

/// A message with its parts attached, in creation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedMessage {
    /// The message.
    pub message: Message,
    /// Its parts, ordered by id (ids sort in creation order).
    pub parts: Vec<Part>,
    /// Whether this is an assistant turn still streaming.
    pub streaming: bool,
}

/// One session with everything a consumer renders: status, messages,
/// activity, and context headroom.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedSession {
    /// The session.
    pub session: Session,
    /// Derived status (idle when no status was ever reported).
    pub status: SessionStatus,
    /// Messages in creation order.
    pub messages: Vec<EnrichedMessage>,
    /// Epoch ms of the most recent activity across session and messages.
    pub last_activity: i64,
    /// Percent of the model context window consumed, when computable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_usage_pct: Option<f64>,
}

/// Sessions and instances that share a working directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryGroup {
    /// The working directory.
    pub directory: String,
    /// Project metadata, when a bootstrap reported it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
    /// Instances serving this directory, by port.
    pub instances: Vec<Instance>,
    /// Sessions, most recently active first.
    pub sessions: Vec<EnrichedSession>,
}

/// Summary counters for the world snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorldTotals {
    /// Sessions in the store.
    pub sessions: usize,
    /// Sessions currently running.
    pub running: usize,
    /// Messages in the store.
    pub messages: usize,
    /// Parts in the store.
    pub parts: usize,
    /// Known instances.
    pub instances: usize,
}

/// The coarse-tier derived view of everything the engine knows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldSnapshot {
    /// When this snapshot was computed, epoch ms.
    pub generated_at: i64,
    /// Aggregate connection status across instances.
    pub connection: ConnectionStatus,
    /// Summary counters.
    pub totals: WorldTotals,
    /// Directory groups, most recently active first.
    pub directories: Vec<DirectoryGroup>,
}

impl WorldSnapshot {
    /// All sessions across groups, most recently active first.
    pub fn sessions(&self) -> impl Iterator<Item = &EnrichedSession> {
        let mut all: Vec<&EnrichedSession> =
            self.directories.iter().flat_map(|g| &g.sessions).collect();
        all.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        all.into_iter()
    }

    /// Lookup one group by directory.
    #[must_use]
    pub fn directory(&self, directory: &str) -> Option<&DirectoryGroup> {
        self.directories.iter().find(|g| g.directory == directory)
    }
}

/// Build the world snapshot from the store's current maps.
pub(crate) fn build(store: &StateStore) -> WorldSnapshot {
    let sessions = store.sessions.load();
    let instances = store.instances.load();
    let projects = store.projects.load();
    let statuses = store.statuses.load();

    let mut enriched: HashMap<String, Vec<EnrichedSession>> = HashMap::new();
    for session in sessions.values() {
        let view = enrich(store, session);
        enriched.entry(session.directory.clone()).or_default().push(view);
    }

    let mut directories: Vec<String> = enriched
        .keys()
        .cloned()
        .chain(instances.values().map(|i| i.directory.clone()))
        .chain(projects.keys().cloned())
        .filter(|d| !d.is_empty())
        .collect();
    directories.sort();
    directories.dedup();

    let mut groups: Vec<DirectoryGroup> = directories
        .into_iter()
        .map(|directory| {
            let mut group_sessions = enriched.remove(&directory).unwrap_or_default();
            group_sessions.sort_by(|a, b| {
                b.last_activity
                    .cmp(&a.last_activity)
                    .then_with(|| a.session.id.cmp(&b.session.id))
            });
            let mut group_instances: Vec<Instance> = instances
                .values()
                .filter(|i| i.directory == directory)
                .cloned()
                .collect();
            group_instances.sort_by_key(|i| i.port);
            DirectoryGroup {
                project: projects.get(&directory).cloned(),
                directory,
                instances: group_instances,
                sessions: group_sessions,
            }
        })
        .collect();
    // Sessions with an empty directory still count; they land in a group of
    // their own so nothing silently disappears from the snapshot.
    if let Some(orphans) = enriched.remove("") {
        groups.push(DirectoryGroup {
            directory: String::new(),
            project: None,
            instances: Vec::new(),
            sessions: orphans,
        });
    }
    groups.sort_by(|a, b| {
        let a_recent = a.sessions.first().map_or(i64::MIN, |s| s.last_activity);
        let b_recent = b.sessions.first().map_or(i64::MIN, |s| s.last_activity);
        b_recent.cmp(&a_recent).then_with(|| a.directory.cmp(&b.directory))
    });

    let running = statuses.values().filter(|s| **s == SessionStatus::Running).count();
    WorldSnapshot {
        generated_at: Utc::now().timestamp_millis(),
        connection: aggregate_connection(instances.values()),
        totals: WorldTotals {
            sessions: sessions.len(),
            running,
            messages: store.messages.len(),
            parts: store.parts.len(),
            instances: instances.len(),
        },
        directories: groups,
    }
}

/// Derived view of one session, or `None` if the store does not know it.
pub(crate) fn enrich_session(store: &StateStore, session_id: &str) -> Option<EnrichedSession> {
    let session = store.sessions.get(&session_id.to_string())?;
    Some(enrich(store, &session))
}

fn enrich(store: &StateStore, session: &Session) -> EnrichedSession {
    let all_messages = store.messages.load();
    let all_parts = store.parts.load();

    let mut messages: Vec<EnrichedMessage> = all_messages
        .values()
        .filter(|m| m.session_id == session.id)
        .map(|message| {
            let mut parts: Vec<Part> = all_parts
                .values()
                .filter(|p| p.message_id == message.id)
                .cloned()
                .collect();
            parts.sort_by(|a, b| a.id.cmp(&b.id));
            let streaming = message.role == Role::Assistant && message.time.completed.is_none();
            EnrichedMessage { message: message.clone(), parts, streaming }
        })
        .collect();
    messages.sort_by(|a, b| {
        a.message
            .time
            .created
            .cmp(&b.message.time.created)
            .then_with(|| a.message.id.cmp(&b.message.id))
    });

    let last_activity = messages
        .iter()
        .flat_map(|m| [Some(m.message.time.created), m.message.time.completed])
        .flatten()
        .chain([session.time.updated, session.time.created])
        .max()
        .unwrap_or_default();

    let status = store
        .statuses
        .get(&session.id)
        .unwrap_or_default();

    EnrichedSession {
        context_usage_pct: context_usage(session, &messages),
        session: session.clone(),
        status,
        messages,
        last_activity,
    }
}

/// Context consumption of the most recent assistant turn with usage, against
/// the session's model context limit.
fn context_usage(session: &Session, messages: &[EnrichedMessage]) -> Option<f64> {
    let limit = session.model.as_ref()?.context_limit?;
    if limit == 0 {
        return None;
    }
    let used = messages
        .iter()
        .rev()
        .filter(|m| m.message.role == Role::Assistant)
        .find_map(|m| m.message.tokens)?
        .total();
    Some((used as f64 / limit as f64 * 100.0).min(100.0))
}

fn aggregate_connection<'a>(instances: impl Iterator<Item = &'a Instance>) -> ConnectionStatus {
    let mut total = 0usize;
    let mut connected = 0usize;
    let mut connecting = 0usize;
    let mut errored = 0usize;
    for instance in instances {
        total += 1;
        match instance.state {
            ConnectionState::Connected => connected += 1,
            ConnectionState::Connecting => connecting += 1,
            ConnectionState::Error => errored += 1,
            ConnectionState::Disconnected => {}
        }
    }
    if total == 0 {
        ConnectionStatus::Discovering
    } else if connected > 0 {
        ConnectionStatus::Connected
    } else if connecting > 0 {
        ConnectionStatus::Connecting
    } else if errored == total {
        ConnectionStatus::Error
    } else {
        ConnectionStatus::Disconnected
    }
}
