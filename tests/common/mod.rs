#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for SignalR connection integration tests.
//!
//! Provides scripted [`MockHttpClient`] and [`MockConnector`] collaborators
//! and a channel-driven [`MockTransport`] whose inbound frames are pushed by
//! the test through a [`ServerHandle`].

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use signalr_connect::transport::{CloseFrame, Frame, Headers};
use signalr_connect::{
    Connection, ConnectionConfig, ConnectionEvent, Connector, HttpClient, HttpResponse,
    SignalRError, Transport,
};
use tokio::sync::mpsc;

pub const HOST: &str = "example.test:5000/hub";

type Incoming = Option<Result<Frame, SignalRError>>;

// ── MockHttpClient ──────────────────────────────────────────────────

/// Returns one scripted negotiate outcome and records every request.
pub struct MockHttpClient {
    response: StdMutex<Option<Result<HttpResponse, SignalRError>>>,
    pub requests: Arc<StdMutex<Vec<(String, Headers)>>>,
}

impl MockHttpClient {
    pub fn new(response: Result<HttpResponse, SignalRError>) -> Self {
        Self {
            response: StdMutex::new(Some(response)),
            requests: Arc::new(StdMutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn post(&self, url: &str, headers: &Headers) -> Result<HttpResponse, SignalRError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers.clone()));
        self.response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(SignalRError::Http("negotiate called twice".into())))
    }
}

// ── MockTransport ───────────────────────────────────────────────────

/// Transport whose inbound frames come from a [`ServerHandle`].
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    sent: Arc<StdMutex<Vec<String>>>,
    closes: Arc<StdMutex<Vec<(u16, String)>>>,
    echo: mpsc::UnboundedSender<Incoming>,
    echo_close: bool,
}

/// The test's side of a [`MockTransport`].
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Incoming>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closes: Arc<StdMutex<Vec<(u16, String)>>>,
}

impl ServerHandle {
    pub fn text(&self, text: &str) {
        self.tx.send(Some(Ok(Frame::Text(text.into())))).unwrap();
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.tx
            .send(Some(Ok(Frame::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))))
            .unwrap();
    }

    pub fn error(&self, reason: &str) {
        self.tx
            .send(Some(Err(SignalRError::TransportReceive(reason.into()))))
            .unwrap();
    }

    pub fn end(&self) {
        self.tx.send(None).unwrap();
    }
}

/// Create a transport plus its server handle. With `echo_close`, a local
/// close is answered with the same close frame.
pub fn mock_transport(echo_close: bool) -> (MockTransport, ServerHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let closes = Arc::new(StdMutex::new(Vec::new()));
    let transport = MockTransport {
        incoming: rx,
        sent: Arc::clone(&sent),
        closes: Arc::clone(&closes),
        echo: tx.clone(),
        echo_close,
    };
    (transport, ServerHandle { tx, sent, closes })
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SignalRError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame, SignalRError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            // Every handle dropped: stay open until the connection gives up.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), SignalRError> {
        self.closes.lock().unwrap().push((code, reason.clone()));
        if self.echo_close {
            let _ = self
                .echo
                .send(Some(Ok(Frame::Close(Some(CloseFrame { code, reason })))));
        }
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out one scripted transport (or error) and records every call.
pub struct MockConnector {
    outcome: StdMutex<Option<Result<MockTransport, SignalRError>>>,
    pub calls: Arc<StdMutex<Vec<(String, Headers)>>>,
}

impl MockConnector {
    pub fn new(outcome: Result<MockTransport, SignalRError>) -> Self {
        Self {
            outcome: StdMutex::new(Some(outcome)),
            calls: Arc::new(StdMutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &Headers,
    ) -> Result<Box<dyn Transport>, SignalRError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), headers.clone()));
        match self.outcome.lock().unwrap().take() {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(SignalRError::TransportConstruction(
                "connector called twice".into(),
            )),
        }
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// A connection wired to mocks, with an event receiver subscribed before
/// `connect`.
pub struct Harness {
    pub connection: Connection,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pub server: ServerHandle,
    pub http_requests: Arc<StdMutex<Vec<(String, Headers)>>>,
    pub connector_calls: Arc<StdMutex<Vec<(String, Headers)>>>,
}

impl Harness {
    pub fn transports_constructed(&self) -> usize {
        self.connector_calls.lock().unwrap().len()
    }

    /// Next event, failing the test if none arrives within a second.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Assert that no event arrives within `ms` milliseconds.
    pub async fn expect_quiet(&mut self, ms: u64) {
        if let Ok(Some(ev)) =
            tokio::time::timeout(Duration::from_millis(ms), self.events.recv()).await
        {
            panic!("unexpected event {ev:?}");
        }
    }

    /// Assert that the event stream ends within a second.
    pub async fn expect_end(&mut self) {
        let next = tokio::time::timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("timed out waiting for the event stream to end");
        assert_eq!(next, None, "event arrived instead of end of stream");
    }
}

pub fn harness_with(
    config: ConnectionConfig,
    response: Result<HttpResponse, SignalRError>,
    connector_error: Option<SignalRError>,
    echo_close: bool,
) -> Harness {
    let (transport, server) = mock_transport(echo_close);
    let http = MockHttpClient::new(response);
    let http_requests = Arc::clone(&http.requests);
    let connector = MockConnector::new(match connector_error {
        Some(e) => Err(e),
        None => Ok(transport),
    });
    let connector_calls = Arc::clone(&connector.calls);
    let connection = Connection::with_collaborators(config, Arc::new(http), Arc::new(connector));
    let events = connection.events();
    Harness {
        connection,
        events,
        server,
        http_requests,
        connector_calls,
    }
}

/// Harness for [`HOST`] answering negotiate with `status` and `body`.
pub fn harness(status: u16, body: &str) -> Harness {
    harness_with(
        ConnectionConfig::new(HOST).with_close_timeout(Duration::from_millis(100)),
        Ok(HttpResponse::new(status, body)),
        None,
        false,
    )
}

// ── JSON fixtures ───────────────────────────────────────────────────

pub fn websockets_text_json(connection_id: &str) -> String {
    format!(
        r#"{{"availableTransports":[{{"transport":"WebSockets","transferFormats":["Text"]}}],"connectionId":"{connection_id}"}}"#
    )
}

/// A full ASP.NET Core negotiateVersion=1 response.
pub fn core_v1_json() -> &'static str {
    r#"{
        "negotiateVersion": 1,
        "connectionId": "807809a5-31bf-470d-9e23-afaee35d8a0d",
        "connectionToken": "1fa5c8e4-90a3-4a8b-a1d6-6c1b0f5b3f43",
        "availableTransports": [
            { "transport": "WebSockets", "transferFormats": ["Text", "Binary"] },
            { "transport": "ServerSentEvents", "transferFormats": ["Text"] },
            { "transport": "LongPolling", "transferFormats": ["Text", "Binary"] }
        ]
    }"#
}

/// A legacy ASP.NET SignalR negotiate response.
pub fn legacy_json() -> &'static str {
    r#"{
        "Url": "/signalr",
        "ConnectionToken": "AQAAANCMnd8BFdERjHoAwE",
        "ConnectionId": "0b7e7d0c-8c0a-4c34-a53a-4c5e2c7b0a2f",
        "KeepAliveTimeout": 20.0,
        "DisconnectTimeout": 30.0,
        "TryWebSockets": true,
        "ProtocolVersion": "1.5"
    }"#
}
