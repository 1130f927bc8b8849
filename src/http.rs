//! HTTP seam used for the negotiate request.
//!
//! The connection only ever issues one request per attempt: a `POST` with an
//! empty body to the negotiate URL. [`HttpClient`] is the minimal contract
//! for that; enable the `http-reqwest` feature for a ready-made
//! implementation on top of `reqwest`.

use async_trait::async_trait;

use crate::error::SignalRError;
use crate::transport::Headers;

#[cfg(feature = "http-reqwest")]
pub mod reqwest_client;

#[cfg(feature = "http-reqwest")]
pub use reqwest_client::ReqwestHttpClient;

/// Status code and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body decoded as text.
    pub body: String,
}

impl HttpResponse {
    /// Build a response from its parts.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Issues the negotiate `POST`.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a `POST` with an empty body and the given headers.
    ///
    /// Any status code is a successful exchange; only failures to obtain a
    /// response at all are errors.
    ///
    /// # Errors
    ///
    /// Returns [`SignalRError::Http`] if no response could be obtained.
    async fn post(&self, url: &str, headers: &Headers) -> Result<HttpResponse, SignalRError>;
}
