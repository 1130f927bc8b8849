//! Error types for the SignalR connection client.

use thiserror::Error;

/// Errors that can occur while negotiating or driving a SignalR connection.
///
/// Negotiation failures never reach the caller as a returned `Err`; the
/// connection task turns them into a `connectionError` event whose payload is
/// this type's [`Display`](std::fmt::Display) output.
#[derive(Debug, Error)]
pub enum SignalRError {
    /// The HTTP collaborator could not complete the negotiate request.
    #[error("negotiate request failed: {0}")]
    Http(String),

    /// The negotiate endpoint answered with a status other than 200.
    #[error("negotiate failed with status code {status}")]
    NegotiateStatus {
        /// HTTP status code returned by the server.
        status: u16,
    },

    /// The negotiate body was not a JSON object.
    #[error("cannot parse negotiate response: {body}")]
    MalformedResponse {
        /// Raw response body, kept for diagnosis.
        body: String,
    },

    /// The negotiate response carried an `error` field.
    #[error("server rejected negotiation: {message}")]
    ServerError {
        /// Error text reported by the server.
        message: String,
    },

    /// The server is a legacy ASP.NET SignalR server (`ProtocolVersion` present).
    #[error(
        "detected a connection attempt to an ASP.NET SignalR server; this client only supports \
         ASP.NET Core SignalR servers (see https://aka.ms/signalr-core-differences)"
    )]
    LegacyServer,

    /// The server asked the client to negotiate against another endpoint.
    #[error("negotiate redirect to {url} is not supported")]
    RedirectNotSupported {
        /// Redirect target advertised by the server.
        url: String,
        /// Bearer token to present at the redirect target, if any.
        access_token: Option<String>,
    },

    /// None of the advertised transports is WebSockets with the Text transfer format.
    #[error(
        "the server does not support WebSockets with the Text transfer format, \
         which is the only transport supported by this client"
    )]
    NoCompatibleTransport,

    /// The transport could not be constructed (bad URL or header).
    #[error("cannot start websocket: {0}")]
    TransportConstruction(String),

    /// The transport was constructed but its opening handshake failed.
    #[error("websocket connect failed: {0}")]
    TransportConnect(String),

    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport has already been closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// `connect` was called on a connection that already started.
    #[error("connect has already been called on this connection")]
    AlreadyStarted,

    /// `connect` was called outside a Tokio runtime.
    #[error("no Tokio runtime available to drive the connection")]
    NoRuntime,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for SignalR connection operations.
pub type Result<T> = std::result::Result<T, SignalRError>;

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

    #[test]
    fn status_error_mentions_code() {
        let err = SignalRError::NegotiateStatus { status: 500 };
        assert_eq!(err.to_string(), "negotiate failed with status code 500");
    }

    #[test]
    fn malformed_response_keeps_raw_body() {
        let err = SignalRError::MalformedResponse {
            body: "<html>".into(),
        };
        assert!(err.to_string().contains("<html>"));
    }

    #[test]
    fn legacy_server_points_at_differences_page() {
        let msg = SignalRError::LegacyServer.to_string();
        assert!(msg.contains("ASP.NET Core"));
        assert!(msg.contains("signalr-core-differences"));
    }

    #[test]
    fn io_errors_convert() {
        let err: SignalRError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(err, SignalRError::Io(_)));
        assert!(err.to_string().contains("refused"));
    }
}
