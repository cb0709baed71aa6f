//! SSE transport to one backend instance.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use tokio::time::{Instant, timeout};
use tracing::debug;

use scout_core::events::{Envelope, decode_frame};
use scout_store::metrics::names;

use crate::error::TransportError;

type SseStream = Pin<
    Box<
        dyn Stream<
                Item = Result<
                    eventsource_stream::Event,
                    eventsource_stream::EventStreamError<reqwest::Error>,
                >,
            > + Send,
    >,
>;

/// A live `GET /event` SSE stream, already past the HTTP handshake.
///
/// Yields decoded envelopes; malformed frames are counted and dropped without
/// killing the stream, SSE keep-alive comments reset the heartbeat window
/// like any other traffic. Dropping the value closes the connection.
pub struct EventStream {
    inner: SseStream,
    heartbeat: Duration,
    // Stamped on every raw chunk, before SSE parsing. Keep-alive comments
    // never surface as parsed events, so the timeout has to watch bytes.
    last_activity: Arc<Mutex<Instant>>,
}

impl EventStream {
    /// Open the event stream on `base_url`.
    pub async fn connect(
        client: &reqwest::Client,
        base_url: &str,
        heartbeat: Duration,
    ) -> Result<Self, TransportError> {
        let response = client
            .get(format!("{base_url}/event"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(status.as_u16()));
        }
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let stamp = Arc::clone(&last_activity);
        let bytes = response.bytes_stream().inspect(move |_| *stamp.lock() = Instant::now());
        Ok(Self { inner: Box::pin(bytes.eventsource()), heartbeat, last_activity })
    }

    /// Next well-formed envelope.
    ///
    /// `Ok(None)` means the server closed the stream cleanly. A heartbeat
    /// window with no traffic at all is a [`TransportError::HeartbeatTimeout`].
    pub async fn next_envelope(&mut self) -> Result<Option<Envelope>, TransportError> {
        loop {
            let idle = self.last_activity.lock().elapsed();
            let Some(window) = self.heartbeat.checked_sub(idle) else {
                return Err(TransportError::HeartbeatTimeout(self.heartbeat));
            };
            let Ok(frame) = timeout(window, self.inner.next()).await else {
                // Bytes may have arrived without producing a parsed event;
                // loop to re-measure idle time before declaring a timeout.
                continue;
            };
            match frame {
                None => return Ok(None),
                Some(Err(error)) => return Err(TransportError::Stream(error.to_string())),
                Some(Ok(event)) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    match decode_frame(&event.data) {
                        Ok(envelope) => return Ok(Some(envelope)),
                        Err(error) => {
                            counter!(names::FRAMES_DROPPED).increment(1);
                            debug!(%error, "dropping malformed frame");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_response(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_raw(body.to_string(), "text/event-stream")
    }

    async fn sse_server(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/event"))
            .respond_with(sse_response(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn yields_envelopes_then_clean_end() {
        let body = concat!(
            "data: {\"payload\":{\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"s1\"}}}\n\n",
            "data: {\"payload\":{\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"s2\"}}}\n\n",
        );
        let server = sse_server(body).await;
        let client = reqwest::Client::new();
        let mut stream =
            EventStream::connect(&client, &server.uri(), Duration::from_secs(5)).await.unwrap();

        let first = stream.next_envelope().await.unwrap().unwrap();
        assert_eq!(first.properties["sessionID"], "s1");
        let second = stream.next_envelope().await.unwrap().unwrap();
        assert_eq!(second.properties["sessionID"], "s2");
        assert!(stream.next_envelope().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_not_fatal() {
        let body = concat!(
            "data: this is not json\n\n",
            "data: {\"payload\":{\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"ok\"}}}\n\n",
        );
        let server = sse_server(body).await;
        let client = reqwest::Client::new();
        let mut stream =
            EventStream::connect(&client, &server.uri(), Duration::from_secs(5)).await.unwrap();

        let envelope = stream.next_envelope().await.unwrap().unwrap();
        assert_eq!(envelope.properties["sessionID"], "ok");
    }

    #[tokio::test]
    async fn http_error_fails_the_handshake() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/event"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let client = reqwest::Client::new();
        let result = EventStream::connect(&client, &server.uri(), Duration::from_secs(5)).await;
        assert_matches!(result.err(), Some(TransportError::Http(503)));
    }

    #[tokio::test]
    async fn silence_past_heartbeat_is_a_timeout() {
        use tokio::io::AsyncWriteExt;

        // A server that sends one event and then goes silent without closing.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let headers = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n";
            let frame = "data: {\"payload\":{\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"s1\"}}}\n\n";
            socket.write_all(headers.as_bytes()).await.unwrap();
            socket.write_all(frame.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let client = reqwest::Client::new();
        let base = format!("http://{addr}");
        let mut stream =
            EventStream::connect(&client, &base, Duration::from_millis(100)).await.unwrap();
        assert!(stream.next_envelope().await.unwrap().is_some());
        assert_matches!(
            stream.next_envelope().await,
            Err(TransportError::HeartbeatTimeout(_))
        );
        server.abort();
    }

    #[tokio::test]
    async fn keep_alive_comments_hold_the_window_open() {
        use tokio::io::AsyncWriteExt;

        // Comments alone for well past the heartbeat window, then a real
        // event. The comments never parse into events, but their bytes must
        // still count as traffic.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let headers = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n";
            socket.write_all(headers.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                socket.write_all(b": keep-alive\n\n").await.unwrap();
                socket.flush().await.unwrap();
            }
            let frame = "data: {\"payload\":{\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"s1\"}}}\n\n";
            socket.write_all(frame.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let client = reqwest::Client::new();
        let base = format!("http://{addr}");
        let mut stream =
            EventStream::connect(&client, &base, Duration::from_millis(200)).await.unwrap();
        let envelope = stream.next_envelope().await.unwrap().unwrap();
        assert_eq!(envelope.properties["sessionID"], "s1");
        server.abort();
    }
}
