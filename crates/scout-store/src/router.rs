//! Event routing: one wire event in, canonical-map mutations out.
//!
//! The rules here are the whole contract between the wire protocol and the
//! store:
//!
//! | event                  | mutation                                   | side signal        |
//! |------------------------|--------------------------------------------|--------------------|
//! | `session.created`      | upsert session                             | refresh routing    |
//! | `session.updated`      | upsert session                             | refresh routing    |
//! | `session.deleted`      | remove session + messages/parts/status     | drop routing entry |
//! | `message.updated`      | upsert message                             | refresh routing, infer running |
//! | `message.removed`      | remove message + its parts                 | —                  |
//! | `message.part.updated` | upsert part                                | refresh routing, infer running |
//! | `message.part.removed` | remove part                                | —                  |
//! | `session.status`       | set derived status (absent = idle)         | refresh routing    |
//! | `session.idle`         | force status idle                          | —                  |
//! | `session.error`        | set status error (id present only)         | —                  |
//! | `session.compacted`    | none (reserved)                            | —                  |
//! | `session.diff`         | none (reserved)                            | —                  |
//!
//! "Infer running": message and part traffic means the session is doing work,
//! even if no explicit status arrived. Explicit `session.status` /
//! `session.idle` always win afterwards because routing is strictly
//! last-applied-wins — this is why bootstrap emits statuses after parts.
//!
//! "Refresh routing" only applies to instance-origin events. External-source
//! events mutate canonical state but never claim instance ownership.

use tracing::debug;

use scout_core::events::{EventOrigin, ServerEvent};
use scout_core::model::SessionStatus;

use crate::store::StateStore;

/// What a routed event did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Whether any map changed.
    pub mutated: bool,
    /// The session whose fine cell should refresh, if one was touched.
    pub touched_session: Option<String>,
}

impl RouteOutcome {
    fn touched(mutated: bool, session_id: &str) -> Self {
        Self { mutated, touched_session: Some(session_id.to_string()) }
    }
}

/// Apply one event to the store's maps. Pure bookkeeping: no notification,
/// no metrics — [`StateStore::apply`] owns those.
pub fn route(store: &StateStore, origin: EventOrigin, event: &ServerEvent) -> RouteOutcome {
    match event {
        ServerEvent::SessionCreated { info } | ServerEvent::SessionUpdated { info } => {
            let _ = store.sessions.insert(info.id.clone(), info.clone());
            let _ = refresh_route(store, origin, &info.id);
            RouteOutcome::touched(true, &info.id)
        }
        ServerEvent::SessionDeleted { info } => {
            let existed = store.sessions.remove(&info.id).is_some();
            let messages = store.messages.retain(|_, m| m.session_id != info.id);
            let parts = store.parts.retain(|_, p| p.session_id != info.id);
            let status = store.statuses.remove(&info.id).is_some();
            let routed = store.routing.remove(&info.id).is_some();
            let mutated = existed || messages > 0 || parts > 0 || status || routed;
            RouteOutcome::touched(mutated, &info.id)
        }
        ServerEvent::MessageUpdated { info } => {
            let _ = store.messages.insert(info.id.clone(), info.clone());
            let _ = infer_running(store, &info.session_id);
            let _ = refresh_route(store, origin, &info.session_id);
            RouteOutcome::touched(true, &info.session_id)
        }
        ServerEvent::MessageRemoved { session_id, message_id } => {
            let existed = store.messages.remove(message_id).is_some();
            let parts = store.parts.retain(|_, p| p.message_id != *message_id);
            RouteOutcome::touched(existed || parts > 0, session_id)
        }
        ServerEvent::PartUpdated { part, .. } => {
            let _ = store.parts.insert(part.id.clone(), part.clone());
            let _ = infer_running(store, &part.session_id);
            let _ = refresh_route(store, origin, &part.session_id);
            RouteOutcome::touched(true, &part.session_id)
        }
        ServerEvent::PartRemoved { session_id, part_id, .. } => {
            let existed = store.parts.remove(part_id).is_some();
            RouteOutcome::touched(existed, session_id)
        }
        ServerEvent::SessionStatus { session_id, status } => {
            let derived = status.as_ref().map_or(SessionStatus::Idle, |s| s.derived());
            let changed = set_status(store, session_id, derived);
            let routed = refresh_route(store, origin, session_id);
            RouteOutcome::touched(changed || routed, session_id)
        }
        ServerEvent::SessionIdle { session_id } => {
            let changed = set_status(store, session_id, SessionStatus::Idle);
            RouteOutcome::touched(changed, session_id)
        }
        ServerEvent::SessionError { session_id, error } => match session_id {
            Some(session_id) => {
                let changed = set_status(store, session_id, SessionStatus::Error);
                RouteOutcome::touched(changed, session_id)
            }
            None => {
                debug!(?error, "session.error without session id, nothing to mutate");
                RouteOutcome::default()
            }
        },
        ServerEvent::SessionCompacted { session_id } | ServerEvent::SessionDiff { session_id, .. } => {
            debug!(session_id, kind = event.kind(), "reserved event kind, no mutation");
            RouteOutcome::default()
        }
    }
}

/// Point the routing table at the originating instance. Instance-origin only.
fn refresh_route(store: &StateStore, origin: EventOrigin, session_id: &str) -> bool {
    let Some(port) = origin.port() else {
        return false;
    };
    if store.routing.get(&session_id.to_string()) == Some(port) {
        return false;
    }
    let _ = store.routing.insert(session_id.to_string(), port);
    true
}

/// Message/part traffic implies the session is running.
fn infer_running(store: &StateStore, session_id: &str) -> bool {
    set_status(store, session_id, SessionStatus::Running)
}

/// Set a session's derived status. Sessions the store has never heard of
/// (no session record, no status entry) are left alone: a status with no
/// session is noise, and the default derived status is idle anyway.
fn set_status(store: &StateStore, session_id: &str, status: SessionStatus) -> bool {
    let key = session_id.to_string();
    let current = store.statuses.get(&key);
    if current == Some(status) {
        return false;
    }
    if current.is_none()
        && !store.sessions.contains_key(&key)
        && status == SessionStatus::Idle
    {
        return false;
    }
    let _ = store.statuses.insert(key, status);
    true
}
