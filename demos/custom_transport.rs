//! # Custom Transport Example
//!
//! Shows how to plug in-process collaborators into a [`Connection`]:
//!
//! - a canned [`HttpClient`] that answers negotiate without a network, and
//! - a loopback [`Connector`] / [`Transport`] pair whose "server" half is
//!   driven from `main`.
//!
//! Useful for testing hub-protocol code without a real SignalR server, or as
//! a template for adapting another I/O layer.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use signalr_connect::transport::{Frame, Headers};
use signalr_connect::{
    Connection, ConnectionConfig, ConnectionEvent, Connector, HttpClient, HttpResponse,
    SignalRError, Transport,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A negotiate client that never touches the network
// ─────────────────────────────────────────────────────────────────────

struct CannedNegotiate;

#[async_trait]
impl HttpClient for CannedNegotiate {
    async fn post(&self, url: &str, _headers: &Headers) -> Result<HttpResponse, SignalRError> {
        tracing::info!("negotiate POST {url}");
        let body = serde_json::json!({
            "negotiateVersion": 1,
            "connectionId": "loopback-id",
            "connectionToken": "loopback-token",
            "availableTransports": [
                { "transport": "WebSockets", "transferFormats": ["Text", "Binary"] }
            ]
        });
        Ok(HttpResponse::new(200, body.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A channel-based loopback transport
// ─────────────────────────────────────────────────────────────────────

/// Client half, handed to the connection by [`LoopbackConnector`].
struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

/// Server half, used by `main` to play the server.
struct LoopbackServer {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<Frame>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), SignalRError> {
        self.tx
            .send(message)
            .map_err(|e| SignalRError::TransportSend(e.to_string()))
    }

    /// Cancel-safe because `mpsc::UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<Frame, SignalRError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), SignalRError> {
        tracing::info!("loopback close requested: {code} {reason}");
        Ok(())
    }
}

/// Hands out the one pre-built loopback transport.
struct LoopbackConnector {
    transport: Mutex<Option<LoopbackTransport>>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(
        &self,
        url: &str,
        _headers: &Headers,
    ) -> Result<Box<dyn Transport>, SignalRError> {
        tracing::info!("opening loopback transport for {url}");
        let transport = self
            .transport
            .lock()
            .map_err(|e| SignalRError::TransportConstruction(e.to_string()))?
            .take()
            .ok_or_else(|| SignalRError::TransportConstruction("already connected".into()))?;
        Ok(Box::new(transport))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire the connection to the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, mut server) = loopback_pair();
    let connector = LoopbackConnector {
        transport: Mutex::new(Some(transport)),
    };

    let connection = Connection::with_collaborators(
        ConnectionConfig::new("loopback.local/hub"),
        Arc::new(CannedNegotiate),
        Arc::new(connector),
    );
    let mut events = connection.events();
    connection.connect()?;

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Connected => {
                tracing::info!(
                    "connected, connection id {:?}",
                    connection.connection_id()
                );
                connection.send("{\"protocol\":\"json\",\"version\":1}\u{1e}");

                // Play the server: read the handshake, answer it, then close.
                if let Some(handshake) = server.rx.recv().await {
                    tracing::info!("server received: {handshake:?}");
                }
                server.tx.send(Frame::Text("{}\u{1e}".into()))?;
                server.tx.send(Frame::Close(Some(signalr_connect::transport::CloseFrame {
                    code: 1000,
                    reason: "demo finished".into(),
                })))?;
            }
            ConnectionEvent::Message(text) => tracing::info!("message: {text:?}"),
            ConnectionEvent::ConnectionError { reason } => {
                tracing::error!("connection error: {reason}");
                break;
            }
            ConnectionEvent::Closed {
                status_code,
                reason,
                was_clean,
            } => {
                tracing::info!("closed: {status_code} {reason} (clean: {was_clean})");
                break;
            }
        }
    }

    Ok(())
}
