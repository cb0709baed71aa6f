//! Bootstrap reads: catching up with an instance's current state.
//!
//! After the SSE stream is attached, the instance's REST surface is read and
//! replayed into the store as synthetic events. Each read degrades
//! independently — a failed listing means that slice of state arrives later
//! via live events instead of blocking the connection.
//!
//! The synthetic order is load-bearing: sessions, then messages, then parts,
//! then statuses LAST. Part replay infers `running` for its session; the
//! status read is the instance's actual answer and must win, which under
//! last-applied-wins means it has to come after every part.

use std::collections::HashMap;

use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use scout_core::events::ServerEvent;
use scout_core::model::{BackendStatus, Message, Part, Project, Session};
use scout_store::metrics::names;

/// Thin client for one instance's REST surface.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

/// `GET /session/{id}/message` returns messages with parts inlined.
#[derive(Debug, Deserialize)]
struct MessageWithParts {
    info: Message,
    #[serde(default)]
    parts: Vec<Part>,
}

/// Everything one bootstrap pass managed to read.
#[derive(Debug, Default)]
pub struct BootstrapSnapshot {
    /// Sessions from `GET /session`.
    pub sessions: Vec<Session>,
    /// Messages across all listed sessions.
    pub messages: Vec<Message>,
    /// Parts across all listed messages.
    pub parts: Vec<Part>,
    /// Per-session status from `GET /session/status`.
    pub statuses: HashMap<String, BackendStatus>,
    /// Project info from `GET /project/current`.
    pub project: Option<Project>,
}

impl ApiClient {
    /// A client for the instance at `base_url`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> reqwest::Result<T> {
        self.client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Read the full bootstrap snapshot, degrading per read.
    pub async fn fetch_bootstrap(&self) -> BootstrapSnapshot {
        let (sessions, statuses, project) = tokio::join!(
            self.get_json::<Vec<Session>>("/session"),
            self.get_json::<HashMap<String, BackendStatus>>("/session/status"),
            self.get_json::<Project>("/project/current"),
        );

        let sessions = sessions.unwrap_or_else(|error| {
            degraded("/session", &error);
            Vec::new()
        });
        let statuses = statuses.unwrap_or_else(|error| {
            degraded("/session/status", &error);
            HashMap::new()
        });
        let project = project
            .map(Some)
            .unwrap_or_else(|error| {
                degraded("/project/current", &error);
                None
            });

        let message_reads = sessions.iter().map(|session| {
            let path = format!("/session/{}/message", session.id);
            async move {
                match self.get_json::<Vec<MessageWithParts>>(&path).await {
                    Ok(messages) => messages,
                    Err(error) => {
                        degraded(&path, &error);
                        Vec::new()
                    }
                }
            }
        });
        let per_session = futures::future::join_all(message_reads).await;

        let mut messages = Vec::new();
        let mut parts = Vec::new();
        for with_parts in per_session.into_iter().flatten() {
            messages.push(with_parts.info);
            parts.extend(with_parts.parts);
        }

        debug!(
            sessions = sessions.len(),
            messages = messages.len(),
            parts = parts.len(),
            statuses = statuses.len(),
            "bootstrap snapshot read"
        );
        BootstrapSnapshot { sessions, messages, parts, statuses, project }
    }
}

fn degraded(path: &str, error: &reqwest::Error) {
    counter!(names::BOOTSTRAP_READS_FAILED).increment(1);
    warn!(path, %error, "bootstrap read failed, degrading to empty");
}

/// Convert a bootstrap snapshot into synthetic events, statuses last.
#[must_use]
pub fn synthetic_events(snapshot: BootstrapSnapshot) -> Vec<ServerEvent> {
    let mut events = Vec::with_capacity(
        snapshot.sessions.len()
            + snapshot.messages.len()
            + snapshot.parts.len()
            + snapshot.statuses.len(),
    );
    events.extend(
        snapshot.sessions.into_iter().map(|info| ServerEvent::SessionCreated { info }),
    );
    events.extend(
        snapshot.messages.into_iter().map(|info| ServerEvent::MessageUpdated { info }),
    );
    events.extend(
        snapshot.parts.into_iter().map(|part| ServerEvent::PartUpdated { part, delta: None }),
    );
    let mut statuses: Vec<(String, BackendStatus)> = snapshot.statuses.into_iter().collect();
    statuses.sort_by(|a, b| a.0.cmp(&b.0));
    events.extend(statuses.into_iter().map(|(session_id, status)| {
        ServerEvent::SessionStatus { session_id, status: Some(status) }
    }));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::model::SessionStatus;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_instance() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "s1", "title": "one", "directory": "/a" },
                { "id": "s2", "title": "two", "directory": "/a" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "s1": { "type": "busy" },
                "s2": { "type": "idle" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/project/current"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "directory": "/a", "name": "alpha"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/s1/message"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "info": { "id": "m1", "sessionID": "s1", "role": "assistant" },
                    "parts": [
                        { "id": "p1", "sessionID": "s1", "messageID": "m1", "type": "text", "text": "hi" }
                    ]
                }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/s2/message"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn fetch_reads_all_surfaces() {
        let server = mock_instance().await;
        let api = ApiClient::new(reqwest::Client::new(), server.uri());
        let snapshot = api.fetch_bootstrap().await;
        assert_eq!(snapshot.sessions.len(), 2);
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.parts.len(), 1);
        assert_eq!(snapshot.statuses.len(), 2);
        assert_eq!(snapshot.project.unwrap().name.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn failed_read_degrades_to_empty_slice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "s1", "directory": "/a" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/status"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/project/current"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/s1/message"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = ApiClient::new(reqwest::Client::new(), server.uri());
        let snapshot = api.fetch_bootstrap().await;
        assert_eq!(snapshot.sessions.len(), 1);
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.statuses.is_empty());
        assert!(snapshot.project.is_none());
    }

    #[test]
    fn synthetic_order_puts_statuses_last() {
        let snapshot = BootstrapSnapshot {
            sessions: vec![Session { id: "s1".into(), ..Session::default() }],
            messages: vec![Message {
                id: "m1".into(),
                session_id: "s1".into(),
                ..Message::default()
            }],
            parts: vec![Part {
                id: "p1".into(),
                session_id: "s1".into(),
                message_id: "m1".into(),
                ..Part::default()
            }],
            statuses: HashMap::from([("s1".to_string(), BackendStatus::Idle)]),
            project: None,
        };
        let kinds: Vec<&str> = synthetic_events(snapshot).iter().map(ServerEvent::kind).collect();
        assert_eq!(
            kinds,
            vec!["session.created", "message.updated", "message.part.updated", "session.status"]
        );
    }

    #[tokio::test]
    async fn replaying_synthetics_yields_true_status() {
        use scout_core::events::EventOrigin;
        use scout_store::StateStore;

        let server = mock_instance().await;
        let api = ApiClient::new(reqwest::Client::new(), server.uri());
        let events = synthetic_events(api.fetch_bootstrap().await);

        let store = StateStore::new();
        for event in &events {
            let _ = store.apply(EventOrigin::Instance(4056), event);
        }
        // s1 replayed a part (inferring running) and its status says busy;
        // s2 has no traffic and its status says idle.
        let s1 = store.session_snapshot("s1").unwrap();
        let s2 = store.session_snapshot("s2").unwrap();
        assert_eq!(s1.status, SessionStatus::Running);
        assert_eq!(s2.status, SessionStatus::Idle);
        assert_eq!(store.route_for("s1"), Some(4056));
    }
}
