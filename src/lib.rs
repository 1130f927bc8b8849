//! # SignalR Connect
//!
//! Client-side connection establishment for ASP.NET Core SignalR.
//!
//! A [`Connection`] performs the two-phase SignalR handshake: an HTTP
//! `negotiate` request that discovers the server's capabilities, followed by
//! an upgrade to a WebSocket transport. Once the transport is open the
//! connection relays its lifecycle signals through four public events and
//! forwards text frames in both directions. What is sent over the transport
//! (the hub protocol) is up to the caller.
//!
//! ## Features
//!
//! - **Ordered negotiate validation**: legacy servers, redirects and
//!   incompatible transports are detected before any socket is opened
//! - **Every failure is observable**: each abort path fires `connectionError`
//! - **Pluggable collaborators**: implement [`HttpClient`] or [`Connector`]
//!   to swap the HTTP client or the transport
//! - **Batteries included**: default features provide a `reqwest` negotiate
//!   client and a `tokio-tungstenite` WebSocket transport
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), signalr_connect::SignalRError> {
//! use signalr_connect::{Connection, ConnectionEvent};
//! use signalr_connect::transport::Headers;
//!
//! let connection = Connection::new("localhost:5000/chat", Headers::new());
//! let mut events = connection.events();
//! connection.connect()?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Connected => {
//!             connection.send("{\"protocol\":\"json\",\"version\":1}\u{1e}");
//!         }
//!         ConnectionEvent::Message(text) => println!("{text}"),
//!         ConnectionEvent::ConnectionError { reason } => eprintln!("error: {reason}"),
//!         ConnectionEvent::Closed { .. } => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod event;
pub mod handlers;
pub mod http;
pub mod negotiate;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::SignalRError;
pub use event::ConnectionEvent;
pub use handlers::SubscriptionId;
pub use http::{HttpClient, HttpResponse};
pub use transport::{Connector, Transport};

#[cfg(feature = "http-reqwest")]
pub use http::ReqwestHttpClient;
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
