//! The canonical state store.
//!
//! All mutation funnels through [`StateStore::apply`] (wire events, routed by
//! [`crate::router`]) or the explicit instance/project lifecycle methods the
//! sync layer calls. Every committed mutation bumps a version counter,
//! refreshes the touched fine-tier cell, and synchronously notifies coarse
//! subscribers — in that order, so a subscriber callback always observes the
//! post-mutation world.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use scout_core::events::{EventOrigin, ServerEvent};
use scout_core::model::{
    ConnectionState, Instance, Message, Part, Project, Session, SessionStatus,
};

use crate::cells::SessionCells;
use crate::cow::CowMap;
use crate::metrics;
use crate::router;
use crate::snapshot::{self, EnrichedSession, WorldSnapshot};

type SubscriberFn = dyn Fn(&WorldSnapshot) + Send + Sync;

/// The canonical store: entity maps, routing table, and both subscription
/// tiers. Clone-free sharing via `Arc<StateStore>`.
pub struct StateStore {
    pub(crate) sessions: CowMap<String, Session>,
    pub(crate) messages: CowMap<String, Message>,
    pub(crate) parts: CowMap<String, Part>,
    pub(crate) statuses: CowMap<String, SessionStatus>,
    /// session id → owning instance port. Instance-origin events only.
    pub(crate) routing: CowMap<String, u16>,
    pub(crate) instances: CowMap<u16, Instance>,
    pub(crate) projects: CowMap<String, Project>,
    version: watch::Sender<u64>,
    version_rx: watch::Receiver<u64>,
    subscribers: Mutex<HashMap<u64, Arc<SubscriberFn>>>,
    next_subscriber: AtomicU64,
    cells: SessionCells,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// A fresh, empty store with the default fine-cell TTL (5 minutes).
    #[must_use]
    pub fn new() -> Self {
        Self::with_cell_ttl(Duration::from_secs(300))
    }

    /// A fresh store with an explicit fine-cell idle TTL.
    #[must_use]
    pub fn with_cell_ttl(cell_ttl: Duration) -> Self {
        let (version, version_rx) = watch::channel(0);
        Self {
            sessions: CowMap::default(),
            messages: CowMap::default(),
            parts: CowMap::default(),
            statuses: CowMap::default(),
            routing: CowMap::default(),
            instances: CowMap::default(),
            projects: CowMap::default(),
            version,
            version_rx,
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            cells: SessionCells::new(cell_ttl),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event ingestion
    // ─────────────────────────────────────────────────────────────────────────

    /// Route one event into the store. Returns whether state changed.
    pub fn apply(&self, origin: EventOrigin, event: &ServerEvent) -> bool {
        let outcome = router::route(self, origin, event);
        if outcome.mutated {
            metrics::count_routed(event.kind());
            self.committed(outcome.touched_session.as_deref());
        }
        outcome.mutated
    }

    /// Bump the version, refresh the touched fine cell, notify subscribers.
    fn committed(&self, touched_session: Option<&str>) {
        self.version.send_modify(|v| *v += 1);
        if let Some(session_id) = touched_session {
            self.cells.refresh(session_id, self);
        }
        self.notify_subscribers();
    }

    fn notify_subscribers(&self) {
        // Clone the callbacks out so a subscriber that drops its guard from
        // inside the callback cannot deadlock on the registry lock.
        let callbacks: Vec<Arc<SubscriberFn>> =
            self.subscribers.lock().values().map(Arc::clone).collect();
        if callbacks.is_empty() {
            return;
        }
        let world = self.world_snapshot();
        for callback in callbacks {
            callback(&world);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Instance and project lifecycle (called by the sync layer)
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or update a discovered instance.
    pub fn upsert_instance(&self, instance: Instance) {
        self.instances.upsert(instance.port, move |_| instance);
        self.committed(None);
    }

    /// Update the connection state of a known instance. No-op for unknown ports.
    pub fn set_instance_state(&self, port: u16, state: ConnectionState) {
        if let Some(mut instance) = self.instances.get(&port) {
            if instance.state == state {
                return;
            }
            instance.state = state;
            let _ = self.instances.insert(port, instance);
            self.committed(None);
        }
    }

    /// Refresh discovery-observed fields on a known instance.
    pub fn touch_instance(&self, port: u16, pid: Option<u32>, directory: &str, last_seen: i64) {
        if let Some(mut instance) = self.instances.get(&port) {
            instance.pid = pid.or(instance.pid);
            if !directory.is_empty() {
                instance.directory = directory.to_string();
            }
            instance.last_seen = last_seen;
            let _ = self.instances.insert(port, instance);
            // Observation bookkeeping only; not a world change worth waking
            // subscribers for.
        }
    }

    /// Tear down an instance that disappeared from discovery.
    ///
    /// Removes the instance and every routing entry pointing at its port.
    /// Sessions, messages, parts, and statuses are retained: the data is
    /// still the latest known truth, it just has no live owner.
    pub fn remove_instance(&self, port: u16) {
        let had_instance = self.instances.remove(&port).is_some();
        let routes_dropped = self.routing.retain(|_, p| *p != port);
        if had_instance || routes_dropped > 0 {
            self.committed(None);
        }
    }

    /// Known instance by port.
    #[must_use]
    pub fn instance(&self, port: u16) -> Option<Instance> {
        self.instances.get(&port)
    }

    /// Mark every instance disconnected. Used on shutdown.
    pub fn mark_all_disconnected(&self) {
        let ports: Vec<u16> = self.instances.load().keys().copied().collect();
        let mut changed = false;
        for port in ports {
            if let Some(mut instance) = self.instances.get(&port) {
                if instance.state != ConnectionState::Disconnected {
                    instance.state = ConnectionState::Disconnected;
                    let _ = self.instances.insert(port, instance);
                    changed = true;
                }
            }
        }
        if changed {
            self.committed(None);
        }
    }

    /// Merge project info observed during a bootstrap.
    pub fn upsert_project(&self, project: Project) {
        let directory = project.directory.clone();
        self.projects.upsert(directory, move |existing| match existing {
            Some(current) => {
                let mut merged = current.clone();
                merged.absorb(&project);
                merged
            }
            None => project,
        });
        self.committed(None);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// The instance port currently serving `session_id`, per the routing table.
    #[must_use]
    pub fn route_for(&self, session_id: &str) -> Option<u16> {
        self.routing.get(&session_id.to_string())
    }

    /// Build the coarse, world-level derived snapshot.
    #[must_use]
    pub fn world_snapshot(&self) -> WorldSnapshot {
        snapshot::build(self)
    }

    /// Current derived view of one session, without registering interest.
    #[must_use]
    pub fn session_snapshot(&self, session_id: &str) -> Option<EnrichedSession> {
        snapshot::enrich_session(self, session_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Coarse tier: synchronous callback on every committed change.
    ///
    /// The callback fires once with the current world before this returns,
    /// then again after each mutation. Dropping the guard unsubscribes.
    #[must_use]
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&WorldSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionGuard {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let callback: Arc<SubscriberFn> = Arc::new(callback);
        callback(&self.world_snapshot());
        let _ = self.subscribers.lock().insert(id, callback);
        SubscriptionGuard { store: Arc::clone(self), id }
    }

    /// Number of live coarse subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Watch channel that ticks on every committed mutation. The façade's
    /// async update stream is built on this.
    #[must_use]
    pub fn version_watch(&self) -> watch::Receiver<u64> {
        self.version_rx.clone()
    }

    /// Fine tier: per-session watch channel. Creating the subscription
    /// materializes the cell; the cell is kept alive while any receiver
    /// exists and for the idle TTL after the last access.
    #[must_use]
    pub fn subscribe_session(&self, session_id: &str) -> watch::Receiver<Option<EnrichedSession>> {
        self.cells.subscribe(session_id, self)
    }

    /// Evict fine cells idle past the TTL with no live receivers.
    /// Returns the number evicted. Driven by the engine's sweep timer.
    pub fn evict_idle_cells(&self) -> usize {
        self.cells.sweep()
    }

    /// Number of materialized fine cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn unsubscribe(&self, id: u64) {
        let _ = self.subscribers.lock().remove(&id);
    }
}

/// RAII handle for a coarse subscription. Dropping it unsubscribes.
pub struct SubscriptionGuard {
    store: Arc<StateStore>,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::model::TimeRange;
    use std::sync::atomic::AtomicUsize;

    fn session(id: &str, directory: &str) -> Session {
        Session {
            id: id.to_string(),
            directory: directory.to_string(),
            time: TimeRange { created: 1, updated: 1 },
            ..Session::default()
        }
    }

    fn created(id: &str, directory: &str) -> ServerEvent {
        ServerEvent::SessionCreated { info: session(id, directory) }
    }

    #[test]
    fn subscribe_fires_immediately_and_on_change() {
        let store = Arc::new(StateStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let guard = store.subscribe(move |_| {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(store.apply(EventOrigin::Instance(4056), &created("s1", "/a")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        drop(guard);
    }

    #[test]
    fn dropped_guard_stops_notifications() {
        let store = Arc::new(StateStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let guard = store.subscribe(move |_| {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
        });
        drop(guard);
        assert_eq!(store.subscriber_count(), 0);
        let _ = store.apply(EventOrigin::Instance(4056), &created("s1", "/a"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_observes_post_mutation_world() {
        let store = Arc::new(StateStore::new());
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let _guard = store.subscribe(move |world| {
            sink.lock().push(world.totals.sessions);
        });
        let _ = store.apply(EventOrigin::Instance(4056), &created("s1", "/a"));
        let _ = store.apply(EventOrigin::Instance(4056), &created("s2", "/a"));
        assert_eq!(*observed.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn version_ticks_only_on_mutation() {
        let store = Arc::new(StateStore::new());
        let watch = store.version_watch();
        assert_eq!(*watch.borrow(), 0);
        let _ = store.apply(EventOrigin::Instance(4056), &created("s1", "/a"));
        assert_eq!(*watch.borrow(), 1);
        // Unknown session idle: no state change, no tick.
        let idle = ServerEvent::SessionIdle { session_id: "ghost".into() };
        assert!(!store.apply(EventOrigin::Instance(4056), &idle));
        assert_eq!(*watch.borrow(), 1);
    }

    #[test]
    fn remove_instance_drops_routes_keeps_sessions() {
        let store = Arc::new(StateStore::new());
        store.upsert_instance(Instance { port: 4057, ..Instance::default() });
        let _ = store.apply(EventOrigin::Instance(4057), &created("s9", "/b"));
        assert_eq!(store.route_for("s9"), Some(4057));

        store.remove_instance(4057);
        assert_eq!(store.route_for("s9"), None);
        assert!(store.instance(4057).is_none());
        assert_eq!(store.world_snapshot().totals.sessions, 1);
    }

    #[test]
    fn set_instance_state_is_noop_for_unknown_port() {
        let store = StateStore::new();
        let watch = store.version_watch();
        store.set_instance_state(9999, ConnectionState::Connected);
        assert_eq!(*watch.borrow(), 0);
    }

    #[test]
    fn upsert_project_merges_observations() {
        let store = StateStore::new();
        store.upsert_project(Project { directory: "/a".into(), name: None, vcs: Some("git".into()) });
        store.upsert_project(Project {
            directory: "/a".into(),
            name: Some("alpha".into()),
            vcs: None,
        });
        let projects = store.projects.load();
        let merged = projects.get("/a").unwrap();
        assert_eq!(merged.name.as_deref(), Some("alpha"));
        assert_eq!(merged.vcs.as_deref(), Some("git"));
    }

    #[test]
    fn mark_all_disconnected_flips_every_instance() {
        let store = StateStore::new();
        store.upsert_instance(Instance {
            port: 1,
            state: ConnectionState::Connected,
            ..Instance::default()
        });
        store.upsert_instance(Instance {
            port: 2,
            state: ConnectionState::Connecting,
            ..Instance::default()
        });
        store.mark_all_disconnected();
        assert_eq!(store.instance(1).unwrap().state, ConnectionState::Disconnected);
        assert_eq!(store.instance(2).unwrap().state, ConnectionState::Disconnected);
    }

    #[test]
    fn fine_subscription_sees_session_updates() {
        let store = Arc::new(StateStore::new());
        let _ = store.apply(EventOrigin::Instance(4056), &created("s1", "/a"));
        let rx = store.subscribe_session("s1");
        assert_eq!(rx.borrow().as_ref().unwrap().session.id, "s1");

        let mut updated = session("s1", "/a");
        updated.title = "renamed".into();
        let _ = store.apply(
            EventOrigin::Instance(4056),
            &ServerEvent::SessionUpdated { info: updated },
        );
        assert_eq!(rx.borrow().as_ref().unwrap().session.title, "renamed");
    }

    #[test]
    fn fine_subscription_for_unknown_session_holds_none_until_created() {
        let store = Arc::new(StateStore::new());
        let rx = store.subscribe_session("later");
        assert!(rx.borrow().is_none());
        let _ = store.apply(EventOrigin::Instance(4056), &created("later", "/a"));
        assert!(rx.borrow().is_some());
    }
}
