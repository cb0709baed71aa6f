//! The consumer-facing hub.
//!
//! [`SessionHub`] bundles a store, a running engine, and any extra event
//! sources into one handle: snapshot, subscribe (sync callback), updates
//! (async stream), per-session subscriptions, dispose. Extra sources are
//! probed once at start; a source that reports or errors unavailable is
//! skipped without affecting instance sync.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use metrics::counter;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scout_core::events::{Envelope, EventOrigin};
use scout_store::metrics::{self as store_metrics, names};
use scout_store::snapshot::{EnrichedSession, WorldSnapshot};
use scout_store::{StateStore, SubscriptionGuard};

use crate::discovery::DiscoveryProvider;
use crate::engine::{EngineConfig, SyncEngine};
use crate::error::SourceError;

/// A non-instance event source merged into the hub.
///
/// Sources speak the same envelope protocol as instances but have no port:
/// their events mutate canonical state without ever claiming routing
/// ownership.
#[async_trait]
pub trait ExtraSource: Send + Sync {
    /// Source name, for logs.
    fn name(&self) -> &str;

    /// Probe availability. `Ok(false)` and `Err` both mean "skip this
    /// source"; the distinction is only log severity.
    async fn available(&self) -> Result<bool, SourceError>;

    /// The source's envelope stream. Called once, after a successful probe.
    async fn events(self: Arc<Self>) -> BoxStream<'static, Envelope>;
}

/// Hub construction knobs.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Engine configuration.
    pub engine: EngineConfig,
    /// Fine-cell idle TTL. `None` keeps the store default (5 minutes).
    pub cell_ttl: Option<Duration>,
}

/// One handle over the whole engine.
pub struct SessionHub {
    store: Arc<StateStore>,
    engine: Arc<SyncEngine>,
    merge_token: CancellationToken,
    // Keeps exposition gauges current from inside the hub.
    _metrics_guard: SubscriptionGuard,
}

impl SessionHub {
    /// Build the store, start the engine, probe and attach extra sources.
    pub async fn start(
        config: HubConfig,
        provider: Arc<dyn DiscoveryProvider>,
        extra_sources: Vec<Arc<dyn ExtraSource>>,
    ) -> Self {
        let store = Arc::new(match config.cell_ttl {
            Some(ttl) => StateStore::with_cell_ttl(ttl),
            None => StateStore::new(),
        });
        let engine = SyncEngine::start(Arc::clone(&store), provider, config.engine);
        let merge_token = CancellationToken::new();

        let mut streams: Vec<BoxStream<'static, Envelope>> = Vec::new();
        for source in extra_sources {
            match source.available().await {
                Ok(true) => {
                    info!(source = source.name(), "extra source attached");
                    streams.push(Arc::clone(&source).events().await);
                }
                Ok(false) => {
                    info!(source = source.name(), "extra source not available, skipping");
                }
                Err(error) => {
                    warn!(source = source.name(), %error, "extra source probe failed, skipping");
                }
            }
        }
        if !streams.is_empty() {
            let _ = tokio::spawn(consume_merged(
                Arc::clone(&store),
                streams,
                merge_token.clone(),
            ));
        }

        let gauges = store_metrics::WorldGauges::new();
        let metrics_guard = store.subscribe(move |world| gauges.record(world));
        Self { store, engine, merge_token, _metrics_guard: metrics_guard }
    }

    /// Current world snapshot.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        self.store.world_snapshot()
    }

    /// Coarse tier: synchronous callback, fired immediately and on every
    /// change. Dropping the guard unsubscribes.
    #[must_use]
    pub fn subscribe(
        &self,
        callback: impl Fn(&WorldSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionGuard {
        self.store.subscribe(callback)
    }

    /// Coarse tier as an async stream. Yields the current snapshot first,
    /// then one per committed change (coalesced under load).
    pub fn updates(&self) -> impl Stream<Item = WorldSnapshot> + Send + 'static {
        let store = Arc::clone(&self.store);
        WatchStream::new(self.store.version_watch()).map(move |_| store.world_snapshot())
    }

    /// Fine tier: watch one session.
    #[must_use]
    pub fn subscribe_session(
        &self,
        session_id: &str,
    ) -> tokio::sync::watch::Receiver<Option<EnrichedSession>> {
        self.store.subscribe_session(session_id)
    }

    /// The underlying store, for read-side composition.
    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Stop the engine and the merge task. Idempotent.
    pub fn dispose(&self) {
        self.merge_token.cancel();
        self.engine.shutdown();
    }
}

impl Drop for SessionHub {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn consume_merged(
    store: Arc<StateStore>,
    streams: Vec<BoxStream<'static, Envelope>>,
    token: CancellationToken,
) {
    let mut merged = futures::stream::select_all(streams);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            next = merged.next() => match next {
                None => break,
                Some(envelope) => match envelope.parse() {
                    Ok(Some(event)) => {
                        let _ = store.apply(EventOrigin::External, &event);
                    }
                    Ok(None) => {
                        counter!(names::EVENTS_SKIPPED).increment(1);
                        debug!(kind = %envelope.kind, "skipping unknown external event kind");
                    }
                    Err(error) => {
                        counter!(names::FRAMES_DROPPED).increment(1);
                        debug!(%error, "dropping invalid external envelope");
                    }
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoverOptions, DiscoveredInstance};
    use serde_json::json;

    struct NoDiscovery;

    #[async_trait]
    impl DiscoveryProvider for NoDiscovery {
        fn name(&self) -> &str {
            "none"
        }

        async fn discover(&self, _options: &DiscoverOptions) -> Vec<DiscoveredInstance> {
            Vec::new()
        }
    }

    enum Probe {
        Available,
        NotAvailable,
        Fails,
    }

    struct FixedSource {
        probe: Probe,
        envelopes: Vec<Envelope>,
    }

    #[async_trait]
    impl ExtraSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn available(&self) -> Result<bool, SourceError> {
            match self.probe {
                Probe::Available => Ok(true),
                Probe::NotAvailable => Ok(false),
                Probe::Fails => Err(SourceError::new("fixed", "probe exploded")),
            }
        }

        async fn events(self: Arc<Self>) -> BoxStream<'static, Envelope> {
            futures::stream::iter(self.envelopes.clone()).boxed()
        }
    }

    fn session_envelope(id: &str) -> Envelope {
        Envelope {
            kind: "session.created".into(),
            properties: json!({ "info": { "id": id, "directory": "/ext" } }),
        }
    }

    fn quiet_config() -> HubConfig {
        HubConfig {
            engine: EngineConfig {
                discovery_interval: Duration::from_secs(3600),
                ..EngineConfig::default()
            },
            cell_ttl: None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn external_events_reach_state_without_routing() {
        let source = Arc::new(FixedSource {
            probe: Probe::Available,
            envelopes: vec![session_envelope("ext1")],
        });
        let hub = SessionHub::start(quiet_config(), Arc::new(NoDiscovery), vec![source]).await;
        settle().await;
        let world = hub.snapshot();
        assert_eq!(world.totals.sessions, 1);
        assert_eq!(hub.store().route_for("ext1"), None);
        hub.dispose();
    }

    #[tokio::test]
    async fn failing_source_does_not_poison_the_rest() {
        let bad = Arc::new(FixedSource { probe: Probe::Fails, envelopes: Vec::new() });
        let off = Arc::new(FixedSource { probe: Probe::NotAvailable, envelopes: Vec::new() });
        let good = Arc::new(FixedSource {
            probe: Probe::Available,
            envelopes: vec![session_envelope("ok")],
        });
        let hub =
            SessionHub::start(quiet_config(), Arc::new(NoDiscovery), vec![bad, off, good]).await;
        settle().await;
        assert!(hub.store().session_snapshot("ok").is_some());
        hub.dispose();
    }

    #[tokio::test]
    async fn unknown_external_kinds_are_skipped() {
        let source = Arc::new(FixedSource {
            probe: Probe::Available,
            envelopes: vec![
                Envelope { kind: "lsp.diagnostics".into(), properties: json!({}) },
                session_envelope("after-unknown"),
            ],
        });
        let hub = SessionHub::start(quiet_config(), Arc::new(NoDiscovery), vec![source]).await;
        settle().await;
        assert!(hub.store().session_snapshot("after-unknown").is_some());
        hub.dispose();
    }

    #[tokio::test]
    async fn updates_stream_yields_current_snapshot_first() {
        let hub = SessionHub::start(quiet_config(), Arc::new(NoDiscovery), Vec::new()).await;
        let mut updates = Box::pin(hub.updates());
        let first = updates.next().await.unwrap();
        assert_eq!(first.totals.sessions, 0);
        hub.dispose();
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let hub = SessionHub::start(quiet_config(), Arc::new(NoDiscovery), Vec::new()).await;
        hub.dispose();
        hub.dispose();
        drop(hub);
    }
}
