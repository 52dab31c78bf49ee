//! REST transport.
//!
//! [`HttpTransport`] is the seam between the auth coordinator and the HTTP
//! stack. The production implementation, [`ReqwestTransport`], keeps the
//! ambient credential in a cookie jar that it shares with the socket dialer.

use std::sync::Arc;

use async_trait::async_trait;
use marquee_proto::{Method, RequestEnvelope};
use reqwest::cookie::Jar;
use serde_json::Value;
use url::Url;

use crate::error::TransportError;

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status
    pub status: u16,
    /// Decoded JSON body. `Null` when empty; a JSON string when the body was
    /// not JSON.
    pub body: Value,
}

impl HttpResponse {
    /// Response with a JSON body.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Backend `detail` message, when present.
    pub fn detail(&self) -> Option<&str> {
        self.body.get("detail").and_then(Value::as_str)
    }
}

/// Executes one envelope against the REST backend.
///
/// Implementations must not interpret the status: a 401 is a successful
/// transport round-trip.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `envelope` and return whatever the backend answered.
    async fn send(&self, envelope: &RequestEnvelope) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport with a shared cookie jar.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base: Url,
    jar: Arc<Jar>,
}

impl ReqwestTransport {
    /// Transport with a fresh cookie jar.
    pub fn new(api_base: Url) -> Result<Self, TransportError> {
        Self::with_jar(api_base, Arc::new(Jar::default()))
    }

    /// Transport that reads and writes credentials through `jar`.
    pub fn with_jar(api_base: Url, jar: Arc<Jar>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(|e| TransportError::Network(format!("client init failed: {e}")))?;
        Ok(Self { client, base: api_base, jar })
    }

    /// Cookie jar holding the credential.
    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        let joined = format!("{}{}", self.base.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| TransportError::InvalidUrl(format!("{joined}: {e}")))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, envelope: &RequestEnvelope) -> Result<HttpResponse, TransportError> {
        let url = self.url_for(envelope.path())?;
        let method = match envelope.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut request = self.client.request(method, url);
        if let Some(body) = envelope.body() {
            request = request.json(body);
        }

        let response =
            request.send().await.map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| TransportError::Network(e.to_string()))?;

        tracing::debug!(method = %envelope.method(), path = envelope.route(), status, "response");

        Ok(HttpResponse::new(status, decode_body(&bytes)))
    }
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
