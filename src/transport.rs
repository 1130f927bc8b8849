//! Transport abstraction for the duplex channel opened after negotiation.
//!
//! Two traits meet here:
//!
//! - [`Connector`] constructs and opens a transport for a URL and header set.
//!   A call to [`Connector::connect`] is the one and only place a transport
//!   comes into existence; the connection never calls it before the negotiate
//!   response has been validated.
//! - [`Transport`] is the live channel: text frames out, text or close frames
//!   in, and a close handshake.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use signalr_connect::error::SignalRError;
//! use signalr_connect::transport::{Frame, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SignalRError> {
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<Frame, SignalRError>> {
//!         todo!()
//!     }
//!
//!     async fn close(&mut self, code: u16, reason: String) -> Result<(), SignalRError> {
//!         todo!()
//!     }
//! }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::SignalRError;

/// Header name to value mapping attached to the negotiate request and the
/// transport handshake.
pub type Headers = HashMap<String, String>;

/// Close status sent by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// WebSocket close status code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
}

/// One inbound frame of interest to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete text message.
    Text(String),
    /// The peer started or answered the closing handshake. `None` when the
    /// close frame carried no status.
    Close(Option<CloseFrame>),
}

/// A bidirectional text transport.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the connection polls it
/// inside `tokio::select!`, and a cancelled call must not lose a frame.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SignalRError::TransportSend`] if the frame could not be
    /// written, or [`SignalRError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), SignalRError>;

    /// Receive the next frame.
    ///
    /// Returns:
    /// - `Some(Ok(frame))` — a text or close frame arrived
    /// - `Some(Err(e))` — the transport failed
    /// - `None` — the stream ended without a close frame
    async fn recv(&mut self) -> Option<Result<Frame, SignalRError>>;

    /// Start the closing handshake with the given status code and reason.
    ///
    /// The peer's answering close frame, if any, is delivered by
    /// [`recv`](Transport::recv).
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame could not be written.
    async fn close(&mut self, code: u16, reason: String) -> Result<(), SignalRError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: String) -> Result<(), SignalRError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<Frame, SignalRError>> {
        (**self).recv().await
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), SignalRError> {
        (**self).close(code, reason).await
    }
}

/// Constructs and opens [`Transport`]s.
///
/// Implementations report construction problems (URL or headers that cannot
/// be turned into a handshake request) as
/// [`SignalRError::TransportConstruction`], and handshake or network problems
/// as [`SignalRError::TransportConnect`] or [`SignalRError::Io`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `url`, sending `headers` with the handshake.
    /// No sub-protocol is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport could not be constructed or opened.
    async fn connect(&self, url: &str, headers: &Headers)
        -> Result<Box<dyn Transport>, SignalRError>;
}
