//! The SignalR connection: negotiate, then hand off to a live transport.
//!
//! [`Connection`] is a handle to a single connection attempt. Calling
//! [`Connection::connect`] spawns a background task that
//!
//! 1. POSTs to `http://{host}/negotiate?negotiateVersion=1`,
//! 2. validates the response (see [`negotiate`](crate::negotiate)),
//! 3. opens the transport at `ws://{host}` with the same headers, and
//! 4. relays the transport's signals to the connection's public events while
//!    forwarding [`send`](Connection::send) and [`close`](Connection::close).
//!
//! Every abort path is logged and reported through the `connectionError`
//! event; nothing is returned to the caller of `connect`.
//!
//! # Example
//!
//! ```rust,ignore
//! let connection = Connection::new("localhost:5000/chat", Headers::new());
//! let mut events = connection.events();
//! connection.connect()?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Connected => connection.send(handshake_json),
//!         ConnectionEvent::Message(text) => { /* … */ }
//!         ConnectionEvent::ConnectionError { reason } => eprintln!("{reason}"),
//!         ConnectionEvent::Closed { .. } => break,
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SignalRError};
use crate::event::ConnectionEvent;
use crate::handlers::{EventHandlers, SubscriptionId};
use crate::http::HttpClient;
use crate::negotiate::{self, Negotiated};
use crate::transport::{CloseFrame, Connector, Frame, Headers, Transport};

/// Default time a locally initiated close waits for the server's close frame.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Close status reported when the stream ended without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

/// Close status reported when the server's close frame carried no status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Reason reported when the connection task stops without settling its state.
const TASK_ENDED: &str = "connection task ended unexpectedly";

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`Connection`].
///
/// # Example
///
/// ```
/// use signalr_connect::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::new("localhost:5000/chat")
///     .with_header("Authorization", "Bearer abc")
///     .with_close_timeout(Duration::from_secs(5));
/// assert_eq!(config.negotiate_url(), "http://localhost:5000/chat/negotiate?negotiateVersion=1");
/// assert_eq!(config.transport_url(), "ws://localhost:5000/chat");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address without scheme, e.g. `localhost:5000/chat`.
    pub host: String,
    /// Headers sent with the negotiate request and the transport handshake.
    pub headers: Headers,
    /// How long [`Connection::close`] waits for the server's close frame
    /// before reporting an unclean closure.
    ///
    /// Defaults to **1 second**.
    pub close_timeout: Duration,
}

impl ConnectionConfig {
    /// Create a configuration for `host` with no headers.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            headers: Headers::new(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Add one header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace the header set.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the close handshake timeout.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// URL of the negotiate request.
    pub fn negotiate_url(&self) -> String {
        negotiate::negotiate_url(&self.host)
    }

    /// URL the transport connects to.
    pub fn transport_url(&self) -> String {
        negotiate::transport_url(&self.host)
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Lifecycle stage of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `connect` has not been called.
    NotStarted,
    /// The negotiate request is in flight.
    Negotiating,
    /// Negotiation succeeded and the transport is opening.
    StartingTransport,
    /// The transport is open.
    Connected,
    /// A local close is waiting for the server's close frame.
    Closing,
    /// The server asked for a redirect, which this client does not follow.
    RedirectPending,
    /// Negotiation or transport start failed.
    Failed,
    /// The transport closed.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for states no further event can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::RedirectPending | Self::Failed | Self::Closed)
    }
}

/// State shared between the handle and the connection task.
struct Shared {
    state: Mutex<ConnectionState>,
    connection_id: Mutex<Option<String>>,
    handlers: EventHandlers,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::NotStarted),
            connection_id: Mutex::new(None),
            handlers: EventHandlers::new(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        debug!(?state, "connection state changed");
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `to` only if the current state is `from`.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        drop(state);
        debug!(state = ?to, "connection state changed");
        true
    }
}

/// Settles the shared state when the connection task stops, whether it
/// returned, panicked or was aborted, and ends every `events()` stream.
struct SettleOnExit(Arc<Shared>);

impl Drop for SettleOnExit {
    fn drop(&mut self) {
        let shared = &self.0;
        match shared.state() {
            ConnectionState::Connected | ConnectionState::Closing => {
                warn!("{TASK_ENDED}");
                report_closed(shared, CLOSE_ABNORMAL, TASK_ENDED.to_string(), false);
            }
            ConnectionState::Negotiating | ConnectionState::StartingTransport => {
                warn!("{TASK_ENDED}");
                shared.set_state(ConnectionState::Failed);
                shared.handlers.dispatch(&ConnectionEvent::ConnectionError {
                    reason: TASK_ENDED.to_string(),
                });
            }
            ConnectionState::NotStarted
            | ConnectionState::RedirectPending
            | ConnectionState::Failed
            | ConnectionState::Closed => {}
        }
        shared.handlers.close_channels();
    }
}

/// Requests from the handle to the relay loop.
#[derive(Debug)]
enum Command {
    Send(String),
    Close { code: u16, reason: String },
}

// ── Connection handle ───────────────────────────────────────────────

/// A SignalR Core connection.
///
/// Host and headers are fixed at construction. [`connect`](Self::connect) may
/// be called once; afterwards the outcome is observable only through the
/// `connected`, `connectionError`, `closed` and `message` events.
pub struct Connection {
    config: ConnectionConfig,
    http: Arc<dyn HttpClient>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// Taken by the first `connect`.
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection using the built-in `reqwest` negotiate client and
    /// `tokio-tungstenite` transport.
    #[cfg(all(feature = "http-reqwest", feature = "transport-websocket"))]
    pub fn new(host: impl Into<String>, headers: Headers) -> Self {
        Self::with_config(ConnectionConfig::new(host).with_headers(headers))
    }

    /// Create a connection from a [`ConnectionConfig`] using the built-in
    /// collaborators.
    #[cfg(all(feature = "http-reqwest", feature = "transport-websocket"))]
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(crate::http::ReqwestHttpClient::new()),
            Arc::new(crate::transports::WebSocketConnector::new()),
        )
    }

    /// Create a connection with caller-supplied HTTP and transport
    /// collaborators.
    pub fn with_collaborators(
        config: ConnectionConfig,
        http: Arc<dyn HttpClient>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            config,
            http,
            connector,
            shared: Arc::new(Shared::new()),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            task: Mutex::new(None),
        }
    }

    /// Begin the handshake.
    ///
    /// Returns as soon as the background task is spawned; success or failure
    /// of negotiation and transport start is reported only through events.
    ///
    /// # Errors
    ///
    /// Returns [`SignalRError::AlreadyStarted`] on every call after the first,
    /// and [`SignalRError::NoRuntime`] when called outside a Tokio runtime.
    /// Neither error changes the connection's state.
    pub fn connect(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            error!("connect called outside a Tokio runtime");
            SignalRError::NoRuntime
        })?;

        let Some(cmd_rx) = self.cmd_rx.lock().take() else {
            warn!(host = %self.config.host, "connect called more than once; ignoring");
            return Err(SignalRError::AlreadyStarted);
        };

        self.shared.set_state(ConnectionState::Negotiating);

        let task = runtime.spawn(run_connection(
            self.config.clone(),
            Arc::clone(&self.http),
            Arc::clone(&self.connector),
            Arc::clone(&self.shared),
            cmd_rx,
        ));
        *self.task.lock() = Some(task);
        Ok(())
    }

    /// Returns `true` iff a transport exists and reports itself open.
    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    /// Current lifecycle stage.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Identifier issued by the server during negotiation, if any.
    pub fn connection_id(&self) -> Option<String> {
        self.shared.connection_id.lock().clone()
    }

    /// Server address this connection was created for.
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Headers sent with negotiation and the transport handshake.
    pub fn headers(&self) -> &Headers {
        &self.config.headers
    }

    /// Send one text frame. Framing is the caller's responsibility.
    ///
    /// Dropped (and logged) when the transport is not connected.
    pub fn send(&self, data: impl Into<String>) {
        if !self.is_connected() {
            error!("cannot send data to a non-connected websocket");
            return;
        }
        if self.cmd_tx.send(Command::Send(data.into())).is_err() {
            error!("cannot send data: connection task has exited");
        }
    }

    /// Start the closing handshake. The outcome arrives as a `closed` event.
    ///
    /// Dropped (and logged) when the transport is not connected. From here on
    /// [`is_connected`](Self::is_connected) is `false` and further `send` or
    /// `close` calls are dropped too.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        if !self
            .shared
            .transition(ConnectionState::Connected, ConnectionState::Closing)
        {
            error!("cannot close a non-connected websocket");
            return;
        }
        let reason = reason.into();
        if self.cmd_tx.send(Command::Close { code, reason }).is_err() {
            error!("cannot close: connection task has exited");
        }
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Subscribe to the `connected` event.
    pub fn on_connected(&self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.shared.handlers.on_connected(callback)
    }

    /// Subscribe to the `connectionError` event.
    pub fn on_connection_error(
        &self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.handlers.on_connection_error(callback)
    }

    /// Subscribe to the `closed` event: `(status_code, reason, was_clean)`.
    pub fn on_closed(
        &self,
        callback: impl Fn(u16, &str, bool) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.handlers.on_closed(callback)
    }

    /// Subscribe to the `message` event.
    pub fn on_message(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> SubscriptionId {
        self.shared.handlers.on_message(callback)
    }

    /// Remove a subscription made with any `on_*` method.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.handlers.unsubscribe(id)
    }

    /// Receive every event on all four channels through an unbounded channel.
    ///
    /// Subscribe before calling [`connect`](Self::connect) to see every event.
    /// The receiver yields `None` once the connection task has finished, i.e.
    /// after the terminal `connectionError` or `closed` event.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn events(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.shared.handlers.subscribe_channel()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.config.host)
            .field("state", &self.state())
            .field("connection_id", &self.connection_id())
            .field("has_task", &self.task.lock().is_some())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // No executor is available here to drive a close handshake.
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

// ── Connection task ─────────────────────────────────────────────────

async fn run_connection(
    config: ConnectionConfig,
    http: Arc<dyn HttpClient>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let _settle = SettleOnExit(Arc::clone(&shared));

    let negotiated = match run_negotiation(&config, http.as_ref()).await {
        Ok(negotiated) => negotiated,
        Err(e) => {
            abort(&shared, &e);
            return;
        }
    };

    if let Some(id) = negotiated.connection_id {
        debug!(connection_id = %id, "negotiation issued connection id");
        *shared.connection_id.lock() = Some(id);
    }

    shared.set_state(ConnectionState::StartingTransport);
    let url = config.transport_url();
    let transport = match connector.connect(&url, &config.headers).await {
        Ok(transport) => transport,
        Err(e) => {
            warn!(url = %url, "websocket error: {e}");
            abort(&shared, &e);
            return;
        }
    };

    info!(url = %url, "transport connected");
    shared.set_state(ConnectionState::Connected);
    shared.handlers.dispatch(&ConnectionEvent::Connected);

    relay(transport, &mut cmd_rx, &shared, config.close_timeout).await;
    while let Ok(cmd) = cmd_rx.try_recv() {
        warn!(?cmd, "dropping command issued after the transport closed");
    }
    debug!("connection task exited");
}

async fn run_negotiation(config: &ConnectionConfig, http: &dyn HttpClient) -> Result<Negotiated> {
    let url = config.negotiate_url();
    info!(url = %url, "negotiating");
    let response = http.post(&url, &config.headers).await?;
    debug!(status = response.status, "negotiate response received");
    negotiate::validate_response(&response)
}

/// Log `err`, move to a terminal state, and report it as `connectionError`.
fn abort(shared: &Shared, err: &SignalRError) {
    let state = match err {
        SignalRError::RedirectNotSupported { url, access_token } => {
            error!(
                redirect = %url,
                has_access_token = access_token.is_some(),
                "negotiate redirect is not supported"
            );
            ConnectionState::RedirectPending
        }
        other => {
            error!("{other}");
            ConnectionState::Failed
        }
    };
    shared.set_state(state);
    shared.handlers.dispatch(&ConnectionEvent::ConnectionError {
        reason: err.to_string(),
    });
}

/// Report the transport's closure. The state changes before subscribers run.
fn report_closed(shared: &Shared, status_code: u16, reason: String, was_clean: bool) {
    info!(status_code, reason = %reason, was_clean, "transport closed");
    shared.set_state(ConnectionState::Closed);
    shared.handlers.dispatch(&ConnectionEvent::Closed {
        status_code,
        reason,
        was_clean,
    });
}

/// Relay frames and commands until the transport closes.
///
/// Exits when:
/// - The server sends a close frame or the stream ends
/// - A transport error occurs
/// - The caller requests a close
async fn relay(
    mut transport: Box<dyn Transport>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shared: &Shared,
    close_timeout: Duration,
) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(text)) => {
                        if let Err(e) = transport.send(text).await {
                            fail_transport(shared, &e);
                            return;
                        }
                    }
                    Some(Command::Close { code, reason }) => {
                        close_handshake(transport.as_mut(), shared, code, reason, close_timeout)
                            .await;
                        return;
                    }
                    // The handle owns the sender, so this only happens while
                    // the connection is being dropped.
                    None => {
                        let _ = transport.close(1000, String::new()).await;
                        report_closed(shared, 1000, String::new(), false);
                        return;
                    }
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(Frame::Text(text))) => {
                        shared.handlers.dispatch(&ConnectionEvent::Message(text));
                    }
                    Some(Ok(Frame::Close(frame))) => {
                        let (code, reason) = close_parts(frame);
                        report_closed(shared, code, reason, true);
                        // Let the transport flush its close reply.
                        let _ = tokio::time::timeout(close_timeout, drain(transport.as_mut())).await;
                        return;
                    }
                    Some(Err(e)) => {
                        fail_transport(shared, &e);
                        return;
                    }
                    None => {
                        report_closed(shared, CLOSE_ABNORMAL, String::new(), false);
                        return;
                    }
                }
            }
        }
    }
}

fn fail_transport(shared: &Shared, err: &SignalRError) {
    let reason = err.to_string();
    warn!("websocket error: {reason}");
    shared.handlers.dispatch(&ConnectionEvent::ConnectionError {
        reason: reason.clone(),
    });
    report_closed(shared, CLOSE_ABNORMAL, reason, false);
}

fn close_parts(frame: Option<CloseFrame>) -> (u16, String) {
    frame.map_or((CLOSE_NO_STATUS, String::new()), |f| (f.code, f.reason))
}

/// Send the close frame, then wait for the server's answer. Text frames that
/// arrive meanwhile are still delivered.
async fn close_handshake(
    transport: &mut dyn Transport,
    shared: &Shared,
    code: u16,
    reason: String,
    close_timeout: Duration,
) {
    debug!(code, reason = %reason, "closing transport");
    if let Err(e) = transport.close(code, reason.clone()).await {
        warn!("failed to send close frame: {e}");
        report_closed(shared, code, reason, false);
        return;
    }

    let answer = tokio::time::timeout(close_timeout, async {
        loop {
            match transport.recv().await {
                Some(Ok(Frame::Text(text))) => {
                    shared.handlers.dispatch(&ConnectionEvent::Message(text));
                }
                Some(Ok(Frame::Close(frame))) => return Some(frame),
                Some(Err(e)) => {
                    debug!("receive error during close handshake: {e}");
                    return None;
                }
                None => return None,
            }
        }
    })
    .await;

    match answer {
        Ok(Some(Some(frame))) => report_closed(shared, frame.code, frame.reason, true),
        Ok(Some(None)) => report_closed(shared, code, reason, true),
        Ok(None) => report_closed(shared, code, reason, false),
        Err(_) => {
            warn!("server did not answer the close frame in time");
            report_closed(shared, code, reason, false);
        }
    }
}

async fn drain(transport: &mut dyn Transport) {
    while let Some(Ok(_)) = transport.recv().await {}
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    // ── Mock collaborators ──────────────────────────────────────────

    struct MockHttp {
        response: StdMutex<Option<std::result::Result<HttpResponse, SignalRError>>>,
        calls: Arc<StdMutex<Vec<(String, Headers)>>>,
    }

    #[async_trait]
    impl HttpClient for MockHttp {
        async fn post(
            &self,
            url: &str,
            headers: &Headers,
        ) -> std::result::Result<HttpResponse, SignalRError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), headers.clone()));
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(SignalRError::Http("no scripted response".into())))
        }
    }

    /// Replays scripted frames, then stays open until closed.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<Frame, SignalRError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        close_requests: Arc<StdMutex<Vec<(u16, String)>>>,
        echo_close: bool,
        pending_echo: Option<CloseFrame>,
        panic_on_recv: bool,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), SignalRError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<Frame, SignalRError>> {
            if let Some(frame) = self.pending_echo.take() {
                return Some(Ok(Frame::Close(Some(frame))));
            }
            if self.panic_on_recv {
                panic!("transport bug");
            }
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self, code: u16, reason: String) -> std::result::Result<(), SignalRError> {
            self.close_requests
                .lock()
                .unwrap()
                .push((code, reason.clone()));
            if self.echo_close {
                self.pending_echo = Some(CloseFrame { code, reason });
            }
            Ok(())
        }
    }

    struct MockConnector {
        transport: StdMutex<Option<MockTransport>>,
        urls: Arc<StdMutex<Vec<String>>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(
            &self,
            url: &str,
            _headers: &Headers,
        ) -> std::result::Result<Box<dyn Transport>, SignalRError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            match self.transport.lock().unwrap().take() {
                Some(t) => Ok(Box::new(t)),
                None => Err(SignalRError::TransportConstruction("no transport".into())),
            }
        }
    }

    struct Harness {
        connection: Connection,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        sent: Arc<StdMutex<Vec<String>>>,
        close_requests: Arc<StdMutex<Vec<(u16, String)>>>,
        connector_calls: Arc<AtomicUsize>,
        connector_urls: Arc<StdMutex<Vec<String>>>,
    }

    fn harness(
        response: HttpResponse,
        frames: Vec<Option<std::result::Result<Frame, SignalRError>>>,
        echo_close: bool,
    ) -> Harness {
        harness_with(response, frames, echo_close, false)
    }

    fn harness_with(
        response: HttpResponse,
        frames: Vec<Option<std::result::Result<Frame, SignalRError>>>,
        echo_close: bool,
        panic_on_recv: bool,
    ) -> Harness {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let close_requests = Arc::new(StdMutex::new(Vec::new()));
        let transport = MockTransport {
            incoming: VecDeque::from(frames),
            sent: Arc::clone(&sent),
            close_requests: Arc::clone(&close_requests),
            echo_close,
            pending_echo: None,
            panic_on_recv,
        };
        let connector_calls = Arc::new(AtomicUsize::new(0));
        let connector_urls = Arc::new(StdMutex::new(Vec::new()));
        let connector = MockConnector {
            transport: StdMutex::new(Some(transport)),
            urls: Arc::clone(&connector_urls),
            calls: Arc::clone(&connector_calls),
        };
        let http = MockHttp {
            response: StdMutex::new(Some(Ok(response))),
            calls: Arc::new(StdMutex::new(Vec::new())),
        };
        let connection = Connection::with_collaborators(
            ConnectionConfig::new("example.test:5000/hub")
                .with_close_timeout(Duration::from_millis(100)),
            Arc::new(http),
            Arc::new(connector),
        );
        let events = connection.events();
        Harness {
            connection,
            events,
            sent,
            close_requests,
            connector_calls,
            connector_urls,
        }
    }

    fn compatible() -> HttpResponse {
        HttpResponse::new(
            200,
            r#"{"availableTransports":[{"transport":"WebSockets","transferFormats":["Text"]}],"connectionId":"abc123"}"#,
        )
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = ConnectionConfig::new("host:1");
        assert_eq!(config.host, "host:1");
        assert!(config.headers.is_empty());
        assert_eq!(config.close_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_builder_methods() {
        let config = ConnectionConfig::new("h")
            .with_header("a", "1")
            .with_header("b", "2")
            .with_close_timeout(Duration::from_secs(3));
        assert_eq!(config.headers.len(), 2);
        assert_eq!(config.close_timeout, Duration::from_secs(3));

        let config = config.with_headers(Headers::new());
        assert!(config.headers.is_empty());
    }

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::RedirectPending.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::Closing.is_terminal());
        assert!(!ConnectionState::Negotiating.is_terminal());
    }

    #[test]
    fn connect_outside_runtime_is_rejected() {
        let h = harness(compatible(), vec![], false);
        let err = h.connection.connect().unwrap_err();
        assert!(matches!(err, SignalRError::NoRuntime));
        assert_eq!(h.connection.state(), ConnectionState::NotStarted);
    }

    #[tokio::test]
    async fn successful_negotiation_connects_transport() {
        let mut h = harness(compatible(), vec![], false);
        assert!(!h.connection.is_connected());

        h.connection.connect().unwrap();
        assert_eq!(h.events.recv().await, Some(ConnectionEvent::Connected));

        assert!(h.connection.is_connected());
        assert_eq!(h.connection.connection_id().as_deref(), Some("abc123"));
        assert_eq!(
            *h.connector_urls.lock().unwrap(),
            vec!["ws://example.test:5000/hub".to_string()]
        );
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let mut h = harness(compatible(), vec![], false);
        h.connection.connect().unwrap();
        assert!(matches!(
            h.connection.connect(),
            Err(SignalRError::AlreadyStarted)
        ));
        assert_eq!(h.events.recv().await, Some(ConnectionEvent::Connected));
        assert_eq!(h.connector_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_is_forwarded_once_connected() {
        let mut h = harness(compatible(), vec![], false);
        h.connection.connect().unwrap();
        let _ = h.events.recv().await; // Connected

        h.connection.send("{\"protocol\":\"json\",\"version\":1}\u{1e}");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            *h.sent.lock().unwrap(),
            vec!["{\"protocol\":\"json\",\"version\":1}\u{1e}".to_string()]
        );
    }

    #[tokio::test]
    async fn local_close_reports_echoed_frame() {
        let mut h = harness(compatible(), vec![], true);
        h.connection.connect().unwrap();
        let _ = h.events.recv().await; // Connected

        h.connection.close(1000, "bye");
        assert_eq!(
            h.events.recv().await,
            Some(ConnectionEvent::Closed {
                status_code: 1000,
                reason: "bye".into(),
                was_clean: true,
            })
        );
        assert!(!h.connection.is_connected());
        assert_eq!(
            *h.close_requests.lock().unwrap(),
            vec![(1000, "bye".to_string())]
        );
    }

    #[tokio::test]
    async fn unanswered_close_times_out_unclean() {
        let mut h = harness(compatible(), vec![], false);
        h.connection.connect().unwrap();
        let _ = h.events.recv().await; // Connected

        h.connection.close(4001, "going");
        assert_eq!(
            h.events.recv().await,
            Some(ConnectionEvent::Closed {
                status_code: 4001,
                reason: "going".into(),
                was_clean: false,
            })
        );
        assert_eq!(h.connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn send_during_close_handshake_is_dropped() {
        let mut h = harness(compatible(), vec![], false);
        h.connection.connect().unwrap();
        let _ = h.events.recv().await; // Connected

        h.connection.close(1000, "bye");
        assert_eq!(h.connection.state(), ConnectionState::Closing);
        assert!(!h.connection.is_connected());

        h.connection.send("late");
        h.connection.close(1001, "again");

        assert!(matches!(
            h.events.recv().await,
            Some(ConnectionEvent::Closed { status_code: 1000, .. })
        ));
        assert!(h.sent.lock().unwrap().is_empty());
        assert_eq!(
            *h.close_requests.lock().unwrap(),
            vec![(1000, "bye".to_string())]
        );
    }

    #[tokio::test]
    async fn task_panic_reports_abnormal_closure_and_ends_events() {
        let mut h = harness_with(compatible(), vec![], false, true);
        h.connection.connect().unwrap();
        assert_eq!(h.events.recv().await, Some(ConnectionEvent::Connected));

        assert_eq!(
            h.events.recv().await,
            Some(ConnectionEvent::Closed {
                status_code: 1006,
                reason: TASK_ENDED.into(),
                was_clean: false,
            })
        );
        assert_eq!(h.events.recv().await, None);
        assert_eq!(h.connection.state(), ConnectionState::Closed);
        assert!(!h.connection.is_connected());
    }

    #[tokio::test]
    async fn events_end_after_terminal_failure() {
        let mut h = harness(HttpResponse::new(500, ""), vec![], false);
        h.connection.connect().unwrap();

        assert!(matches!(
            h.events.recv().await,
            Some(ConnectionEvent::ConnectionError { .. })
        ));
        assert_eq!(h.events.recv().await, None);

        let mut late = h.connection.events();
        assert_eq!(late.recv().await, None);
    }

    #[tokio::test]
    async fn close_frame_without_status_reports_1005() {
        let mut h = harness(compatible(), vec![Some(Ok(Frame::Close(None)))], false);
        h.connection.connect().unwrap();
        let _ = h.events.recv().await; // Connected

        assert_eq!(
            h.events.recv().await,
            Some(ConnectionEvent::Closed {
                status_code: 1005,
                reason: String::new(),
                was_clean: true,
            })
        );
    }

    #[tokio::test]
    async fn stream_end_reports_abnormal_closure() {
        let mut h = harness(compatible(), vec![None], false);
        h.connection.connect().unwrap();
        let _ = h.events.recv().await; // Connected

        assert_eq!(
            h.events.recv().await,
            Some(ConnectionEvent::Closed {
                status_code: 1006,
                reason: String::new(),
                was_clean: false,
            })
        );
    }

    #[tokio::test]
    async fn receive_error_reports_error_then_closed() {
        let mut h = harness(
            compatible(),
            vec![Some(Err(SignalRError::TransportReceive("reset".into())))],
            false,
        );
        h.connection.connect().unwrap();
        let _ = h.events.recv().await; // Connected

        match h.events.recv().await {
            Some(ConnectionEvent::ConnectionError { reason }) => assert!(reason.contains("reset")),
            other => panic!("expected ConnectionError, got {other:?}"),
        }
        match h.events.recv().await {
            Some(ConnectionEvent::Closed {
                status_code,
                was_clean,
                ..
            }) => {
                assert_eq!(status_code, 1006);
                assert!(!was_clean);
            }
            other => panic!("expected Closed, got {other:?}"),
        }
        assert!(!h.connection.is_connected());
    }

    #[tokio::test]
    async fn redirect_moves_to_redirect_pending() {
        let mut h = harness(
            HttpResponse::new(200, r#"{"url":"http://elsewhere/hub","accessToken":"t"}"#),
            vec![],
            false,
        );
        h.connection.connect().unwrap();

        match h.events.recv().await {
            Some(ConnectionEvent::ConnectionError { reason }) => {
                assert!(reason.contains("http://elsewhere/hub"));
            }
            other => panic!("expected ConnectionError, got {other:?}"),
        }
        assert_eq!(h.connection.state(), ConnectionState::RedirectPending);
        assert_eq!(h.connector_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn debug_impl_for_connection() {
        let h = harness(compatible(), vec![], false);
        let debug = format!("{:?}", h.connection);
        assert!(debug.contains("Connection"));
        assert!(debug.contains("NotStarted"));
        assert!(debug.contains("example.test:5000/hub"));
    }
}
