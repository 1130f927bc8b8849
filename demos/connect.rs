//! # Connect Example
//!
//! Negotiates with a SignalR Core server, opens the WebSocket transport,
//! performs the JSON hub handshake, and logs every event until the
//! connection closes or Ctrl+C is pressed.
//!
//! ## Running
//!
//! ```sh
//! # Start a SignalR hub at localhost:5000/chat, then:
//! cargo run --example connect
//!
//! # Override the host (no scheme):
//! SIGNALR_HOST=my-server:5000/hub cargo run --example connect
//!
//! # Send a bearer token with negotiate and the WebSocket handshake:
//! SIGNALR_TOKEN=ey... cargo run --example connect
//! ```

use signalr_connect::{Connection, ConnectionConfig, ConnectionEvent};

/// Default host when `SIGNALR_HOST` is not set.
const DEFAULT_HOST: &str = "localhost:5000/chat";

/// JSON hub protocol handshake, terminated by the record separator.
const HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let host = std::env::var("SIGNALR_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let mut config = ConnectionConfig::new(host);
    if let Ok(token) = std::env::var("SIGNALR_TOKEN") {
        config = config.with_header("Authorization", format!("Bearer {token}"));
    }

    // ── Connect ─────────────────────────────────────────────────────
    let connection = Connection::with_config(config);
    let mut events = connection.events();
    connection.connect()?;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };

                match event {
                    ConnectionEvent::Connected => {
                        tracing::info!(
                            "connected (connection id {:?}), sending hub handshake",
                            connection.connection_id()
                        );
                        connection.send(HANDSHAKE);
                    }
                    ConnectionEvent::Message(text) => {
                        tracing::info!("message: {}", text.trim_end_matches('\u{1e}'));
                    }
                    ConnectionEvent::ConnectionError { reason } => {
                        tracing::error!("connection error: {reason}");
                        if connection.state().is_terminal() {
                            break;
                        }
                    }
                    event @ ConnectionEvent::Closed { .. } => {
                        tracing::warn!("{event:?}");
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                if !connection.is_connected() {
                    tracing::info!("Ctrl+C received before the transport opened, exiting");
                    break;
                }
                tracing::info!("Ctrl+C received, closing…");
                connection.close(1000, "client shutting down");
            }
        }
    }

    tracing::info!("final state: {:?}", connection.state());
    Ok(())
}
