//! Per-instance connection lifecycle.
//!
//! One task per instance runs [`InstanceConnection::run`]:
//! connect → bootstrap → stream, with exponential backoff between failures.
//! The SSE stream is attached before the bootstrap reads so events emitted
//! during the bootstrap sit in the socket buffer instead of being lost.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scout_core::events::EventOrigin;
use scout_core::model::ConnectionState;
use scout_core::retry::BackoffPolicy;
use scout_store::StateStore;
use scout_store::metrics::names;

use crate::bootstrap::{ApiClient, synthetic_events};
use crate::error::TransportError;
use crate::transport::EventStream;

/// Connection behavior knobs.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Max silence on the stream before it is declared dead.
    pub heartbeat: Duration,
    /// Reconnect schedule.
    pub backoff: BackoffPolicy,
    /// Reconnect at all. Off means one shot.
    pub auto_reconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            auto_reconnect: true,
        }
    }
}

/// The connection task for one instance.
pub struct InstanceConnection {
    port: u16,
    store: Arc<StateStore>,
    client: reqwest::Client,
    config: ConnectionConfig,
    token: CancellationToken,
}

impl InstanceConnection {
    /// Build the task. [`InstanceConnection::run`] drives it to completion.
    #[must_use]
    pub fn new(
        port: u16,
        store: Arc<StateStore>,
        client: reqwest::Client,
        config: ConnectionConfig,
        token: CancellationToken,
    ) -> Self {
        Self { port, store, client, config, token }
    }

    /// Run until cancelled or the backoff schedule is exhausted. The
    /// instance's state in the store tracks every transition; on exit it is
    /// always `disconnected`.
    pub async fn run(self) {
        let mut attempts: u32 = 0;
        loop {
            if self.token.is_cancelled() {
                break;
            }
            self.store.set_instance_state(self.port, ConnectionState::Connecting);
            match self.serve_once(&mut attempts).await {
                Ok(()) => break, // cancelled while streaming
                Err(error) => {
                    warn!(port = self.port, %error, "instance stream failed");
                    self.store.set_instance_state(self.port, ConnectionState::Error);
                    if !self.config.auto_reconnect || self.config.backoff.exhausted(attempts) {
                        info!(
                            port = self.port,
                            attempts, "giving up on instance until rediscovered"
                        );
                        break;
                    }
                    let delay = self.config.backoff.delay_for(attempts);
                    attempts += 1;
                    counter!(names::RECONNECTS).increment(1);
                    debug!(port = self.port, attempt = attempts, ?delay, "reconnect backoff");
                    tokio::select! {
                        () = self.token.cancelled() => break,
                        () = sleep(delay) => {}
                    }
                }
            }
        }
        self.store.set_instance_state(self.port, ConnectionState::Disconnected);
    }

    async fn serve_once(&self, attempts: &mut u32) -> Result<(), TransportError> {
        let base_url = format!("http://127.0.0.1:{}", self.port);
        let mut stream =
            EventStream::connect(&self.client, &base_url, self.config.heartbeat).await?;

        // Stream is attached; now catch up on current state. The bootstrap
        // reads can outlive a shutdown, so they race the cancellation token
        // and the `connected` transition is gated on it.
        let api = ApiClient::new(self.client.clone(), base_url);
        let mut snapshot = tokio::select! {
            () = self.token.cancelled() => return Ok(()),
            snapshot = api.fetch_bootstrap() => snapshot,
        };
        if let Some(project) = snapshot.project.take() {
            self.store.upsert_project(project);
        }
        for event in synthetic_events(snapshot) {
            let _ = self.store.apply(EventOrigin::Instance(self.port), &event);
        }

        if self.token.is_cancelled() {
            return Ok(());
        }
        self.store.set_instance_state(self.port, ConnectionState::Connected);
        *attempts = 0;
        info!(port = self.port, "instance connected");

        loop {
            tokio::select! {
                () = self.token.cancelled() => return Ok(()),
                next = stream.next_envelope() => match next? {
                    None => {
                        return Err(TransportError::Stream(
                            "server closed the event stream".into(),
                        ));
                    }
                    Some(envelope) => match envelope.parse() {
                        Ok(Some(event)) => {
                            let _ = self.store.apply(EventOrigin::Instance(self.port), &event);
                        }
                        Ok(None) => {
                            counter!(names::EVENTS_SKIPPED).increment(1);
                            debug!(kind = %envelope.kind, "skipping unknown event kind");
                        }
                        Err(error) => {
                            counter!(names::FRAMES_DROPPED).increment(1);
                            debug!(%error, "dropping invalid envelope");
                        }
                    },
                },
            }
        }
    }
}
