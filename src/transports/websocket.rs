//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketConnector`] builds the handshake request (URL plus the
//! connection's headers, no sub-protocol) and opens a [`WebSocketTransport`].
//! Both `ws://` and `wss://` URLs are supported; TLS is handled transparently
//! via [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), signalr_connect::SignalRError> {
//! use signalr_connect::transport::{Connector, Frame, Headers, Transport};
//! use signalr_connect::WebSocketConnector;
//!
//! let mut transport = WebSocketConnector::new()
//!     .connect("ws://localhost:5000/chat", &Headers::new())
//!     .await?;
//! transport.send("hello".to_string()).await?;
//!
//! if let Some(Ok(Frame::Text(msg))) = transport.recv().await {
//!     println!("received: {msg}");
//! }
//!
//! transport.close(1000, "bye".into()).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame as WsCloseFrame, Message};

use crate::error::SignalRError;
use crate::transport::{CloseFrame, Connector, Frame, Headers, Transport};

/// Type alias for the underlying WebSocket stream.
///
/// Made public so that callers can construct a [`WebSocketTransport`] from an
/// existing stream via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Build the client handshake request for `url` carrying `headers`.
///
/// # Errors
///
/// Returns [`SignalRError::TransportConstruction`] if the URL is not a valid
/// WebSocket URL or a header name or value cannot be sent.
pub fn build_request(url: &str, headers: &Headers) -> Result<Request, SignalRError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| SignalRError::TransportConstruction(format!("invalid url {url}: {e}")))?;

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            SignalRError::TransportConstruction(format!("invalid header name {name:?}: {e}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            SignalRError::TransportConstruction(format!("invalid value for header {name}: {e}"))
        })?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}

/// [`Connector`] that opens [`WebSocketTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &Headers,
    ) -> Result<Box<dyn Transport>, SignalRError> {
        let transport = WebSocketTransport::connect(url, headers).await?;
        Ok(Box::new(transport))
    }
}

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe. Dropping the future before it
/// completes does not consume or lose any frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url` with the given handshake headers.
    ///
    /// # Errors
    ///
    /// Returns [`SignalRError::TransportConstruction`] if the request cannot
    /// be built, [`SignalRError::Io`] if the underlying socket fails (the
    /// [`ErrorKind`](std::io::ErrorKind) is preserved), and
    /// [`SignalRError::TransportConnect`] for any other handshake failure.
    pub async fn connect(url: &str, headers: &Headers) -> Result<Self, SignalRError> {
        let request = build_request(url, headers)?;
        tracing::debug!(url = %url, headers = headers.len(), "connecting to WebSocket server");

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Io(io) => SignalRError::Io(io),
                other => SignalRError::TransportConnect(other.to_string()),
            })?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), SignalRError> {
        if self.closed {
            return Err(SignalRError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| SignalRError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, SignalRError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(SignalRError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    let frame = frame.map(|f| CloseFrame {
                        code: u16::from(f.code),
                        reason: f.reason.to_string(),
                    });
                    return Some(Ok(Frame::Close(frame)));
                }
                Message::Ping(_) => {
                    // tungstenite queues the Pong itself.
                    tracing::debug!("received WebSocket ping");
                }
                Message::Pong(_) => {
                    tracing::debug!("received WebSocket pong (ignored)");
                }
                Message::Binary(_) => {
                    tracing::warn!("received binary WebSocket frame on a text transport, skipping");
                }
                Message::Frame(_) => {
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), SignalRError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = WsCloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| SignalRError::TransportSend(e.to_string()))
    }
}

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
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as ServerRequest, Response as ServerResponse,
    };

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[test]
    fn build_request_attaches_headers() {
        let mut headers = Headers::new();
        headers.insert("Authorization".into(), "Bearer abc".into());
        let request = build_request("ws://localhost:5000/chat", &headers).unwrap();
        assert_eq!(request.uri().to_string(), "ws://localhost:5000/chat");
        assert_eq!(request.headers()["authorization"], "Bearer abc");
        assert!(request.headers().get("sec-websocket-protocol").is_none());
    }

    #[test]
    fn build_request_rejects_bad_url() {
        let err = build_request("not a url", &Headers::new()).unwrap_err();
        assert!(matches!(err, SignalRError::TransportConstruction(_)));
    }

    #[test]
    fn build_request_rejects_bad_header() {
        let mut headers = Headers::new();
        headers.insert("bad header".into(), "x".into());
        let err = build_request("ws://localhost", &headers).unwrap_err();
        assert!(matches!(err, SignalRError::TransportConstruction(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1", &Headers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SignalRError::Io(_)));
    }

    // ── Mock-server helpers ──────────────────────────────────────────────

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn handshake_carries_headers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = |req: &ServerRequest,
                            resp: ServerResponse|
             -> Result<ServerResponse, ErrorResponse> {
                let value = req
                    .headers()
                    .get("x-client")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = seen_tx.send(value);
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut headers = Headers::new();
        headers.insert("X-Client".into(), "rust".into());
        let _transport = WebSocketTransport::connect(&format!("ws://{addr}"), &headers)
            .await
            .unwrap();

        assert_eq!(seen_rx.await.unwrap().as_deref(), Some("rust"));
    }

    #[tokio::test]
    async fn recv_yields_text_then_close_frame() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("hello".into())).await.unwrap();
            ws.close(Some(WsCloseFrame {
                code: CloseCode::Normal,
                reason: "done".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, &Headers::new())
            .await
            .unwrap();

        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            Frame::Text("hello".into())
        );
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            Frame::Close(Some(CloseFrame {
                code: 1000,
                reason: "done".into()
            }))
        );
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, &Headers::new())
            .await
            .unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            Frame::Text("after_binary".into())
        );
    }

    #[tokio::test]
    async fn local_close_is_answered_by_peer() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url, &Headers::new())
            .await
            .unwrap();
        transport.close(4000, "bye".into()).await.unwrap();

        match transport.recv().await {
            Some(Ok(Frame::Close(Some(frame)))) => {
                assert_eq!(frame.code, 4000);
                assert_eq!(frame.reason, "bye");
            }
            None | Some(Err(_)) => {}
            Some(Ok(other)) => panic!("expected close echo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url, &Headers::new())
            .await
            .unwrap();
        transport.close(1000, String::new()).await.unwrap();
        transport.close(1000, String::new()).await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, SignalRError::TransportClosed));
    }

    #[tokio::test]
    async fn connector_returns_boxed_transport() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new()
            .connect(&url, &Headers::new())
            .await
            .unwrap();
        transport.send("echo".to_string()).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            Frame::Text("echo".into())
        );
    }
}
