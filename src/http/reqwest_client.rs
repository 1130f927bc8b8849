//! [`HttpClient`] implementation on `reqwest`.

use async_trait::async_trait;

use super::{HttpClient, HttpResponse};
use crate::error::SignalRError;
use crate::transport::Headers;

/// Negotiate client backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client with `reqwest`'s default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing [`reqwest::Client`] (custom TLS, proxy, timeouts).
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post(&self, url: &str, headers: &Headers) -> Result<HttpResponse, SignalRError> {
        tracing::debug!(url = %url, "sending negotiate request");

        let mut request = self.client.post(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SignalRError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SignalRError::Http(e.to_string()))?;

        Ok(HttpResponse { status, body })
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request text.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = tcp.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            tcp.write_all(response.as_bytes()).await.unwrap();
            request
        });

        (format!("http://{addr}/negotiate?negotiateVersion=1"), handle)
    }

    #[tokio::test]
    async fn post_returns_status_and_body() {
        let (url, server) = serve_once("200 OK", r#"{"connectionId":"abc"}"#).await;

        let mut headers = Headers::new();
        headers.insert("X-Test".into(), "yes".into());

        let response = ReqwestHttpClient::new().post(&url, &headers).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"connectionId":"abc"}"#);

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /negotiate?negotiateversion=1"));
        assert!(request.contains("x-test: yes"));
    }

    #[tokio::test]
    async fn non_success_status_is_not_an_error() {
        let (url, _server) = serve_once("500 Internal Server Error", "oops").await;
        let response = ReqwestHttpClient::new()
            .post(&url, &Headers::new())
            .await
            .unwrap();
        assert_eq!(response.status, 500);
    }

    #[tokio::test]
    async fn unreachable_host_is_http_error() {
        let err = ReqwestHttpClient::new()
            .post("http://127.0.0.1:1/negotiate", &Headers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SignalRError::Http(_)));
    }
}
