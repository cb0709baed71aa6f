//! Metric name constants and world-level gauge recording.
//!
//! Counters are incremented at the point of the event they count; gauges are
//! re-recorded from each world snapshot so they survive recorder restarts.

use std::collections::HashSet;

use metrics::{counter, gauge};
use parking_lot::Mutex;

use scout_core::model::ConnectionState;

use crate::snapshot::WorldSnapshot;

/// Metric names, kept in one place so the exposition surface is greppable.
pub mod names {
    /// Counter: events applied to the store, labeled by `kind`.
    pub const EVENTS_ROUTED: &str = "scout_events_routed_total";
    /// Counter: envelopes skipped because the kind is unknown.
    pub const EVENTS_SKIPPED: &str = "scout_events_skipped_total";
    /// Counter: SSE frames dropped as malformed.
    pub const FRAMES_DROPPED: &str = "scout_frames_dropped_total";
    /// Counter: reconnect attempts across all instances.
    pub const RECONNECTS: &str = "scout_reconnects_total";
    /// Counter: bootstrap reads that failed and were degraded to empty.
    pub const BOOTSTRAP_READS_FAILED: &str = "scout_bootstrap_reads_failed_total";
    /// Counter: fine-tier session cells evicted by the TTL sweep.
    pub const CELLS_EVICTED: &str = "scout_cells_evicted_total";
    /// Gauge: known backend instances.
    pub const INSTANCES: &str = "scout_instances";
    /// Gauge: instances with a live event stream.
    pub const INSTANCES_CONNECTED: &str = "scout_instances_connected";
    /// Gauge: sessions in the canonical store.
    pub const SESSIONS: &str = "scout_sessions";
    /// Gauge: sessions currently running.
    pub const SESSIONS_RUNNING: &str = "scout_sessions_running";
    /// Gauge: messages in the canonical store.
    pub const MESSAGES: &str = "scout_messages";
    /// Gauge: messages per session, labeled by `session`.
    pub const SESSION_MESSAGES: &str = "scout_session_messages";
}

/// Record world-level gauges from a snapshot.
pub fn record_world(snapshot: &WorldSnapshot) {
    gauge!(names::INSTANCES).set(snapshot.totals.instances as f64);
    let connected = snapshot
        .directories
        .iter()
        .flat_map(|group| &group.instances)
        .filter(|instance| instance.state == ConnectionState::Connected)
        .count();
    gauge!(names::INSTANCES_CONNECTED).set(connected as f64);
    gauge!(names::SESSIONS).set(snapshot.totals.sessions as f64);
    gauge!(names::SESSIONS_RUNNING).set(snapshot.totals.running as f64);
    gauge!(names::MESSAGES).set(snapshot.totals.messages as f64);
}

/// Count one routed event by wire kind.
pub fn count_routed(kind: &'static str) {
    counter!(names::EVENTS_ROUTED, "kind" => kind).increment(1);
}

/// Stateful snapshot recorder: the world gauges plus the per-session
/// message gauge, which needs memory of the labels already emitted so a
/// deleted session's series drops to zero instead of going stale.
#[derive(Default)]
pub struct WorldGauges {
    labeled: Mutex<HashSet<String>>,
}

impl WorldGauges {
    /// Fresh recorder with no labeled series.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every gauge from one snapshot.
    pub fn record(&self, snapshot: &WorldSnapshot) {
        record_world(snapshot);
        let mut current = HashSet::new();
        for session in snapshot.sessions() {
            let id = session.session.id.clone();
            gauge!(names::SESSION_MESSAGES, "session" => id.clone())
                .set(session.messages.len() as f64);
            let _ = current.insert(id);
        }
        let mut labeled = self.labeled.lock();
        for stale in labeled.difference(&current) {
            gauge!(names::SESSION_MESSAGES, "session" => stale.clone()).set(0.0);
        }
        *labeled = current;
    }
}
