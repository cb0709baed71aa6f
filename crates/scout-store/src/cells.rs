//! Fine-tier subscriptions: one watch cell per session of interest.
//!
//! Cells materialize lazily on first subscription and carry the enriched view
//! of exactly one session. A sweep evicts cells that have been idle past the
//! TTL, but never while a receiver is alive — interest pins the cell no
//! matter how stale it is.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::watch;
use tracing::debug;

use crate::metrics::names;
use crate::snapshot::{self, EnrichedSession};
use crate::store::StateStore;

struct SessionCell {
    tx: watch::Sender<Option<EnrichedSession>>,
    last_access: parking_lot::Mutex<Instant>,
}

impl SessionCell {
    fn new(initial: Option<EnrichedSession>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx, last_access: parking_lot::Mutex::new(Instant::now()) }
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }
}

/// Registry of per-session cells with TTL eviction.
pub(crate) struct SessionCells {
    cells: DashMap<String, Arc<SessionCell>>,
    ttl: Duration,
}

impl SessionCells {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self { cells: DashMap::new(), ttl }
    }

    /// Subscribe to one session, materializing its cell if needed.
    pub(crate) fn subscribe(
        &self,
        session_id: &str,
        store: &StateStore,
    ) -> watch::Receiver<Option<EnrichedSession>> {
        let entry = self.cells.entry(session_id.to_string()).or_insert_with(|| {
            Arc::new(SessionCell::new(snapshot::enrich_session(store, session_id)))
        });
        let cell = Arc::clone(entry.value());
        drop(entry);
        cell.touch();
        cell.tx.subscribe()
    }

    /// Recompute the cell for `session_id`, if one is materialized.
    pub(crate) fn refresh(&self, session_id: &str, store: &StateStore) {
        if let Some(cell) = self.cells.get(session_id) {
            cell.touch();
            let _ = cell.tx.send_replace(snapshot::enrich_session(store, session_id));
        }
    }

    /// Evict idle cells with no receivers. Returns the number evicted.
    pub(crate) fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let before = self.cells.len();
        self.cells.retain(|session_id, cell| {
            let keep = cell.tx.receiver_count() > 0 || cell.idle_for() < ttl;
            if !keep {
                debug!(session_id, "evicting idle session cell");
            }
            keep
        });
        let evicted = before.saturating_sub(self.cells.len());
        if evicted > 0 {
            counter!(names::CELLS_EVICTED).increment(evicted as u64);
        }
        evicted
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }
}
