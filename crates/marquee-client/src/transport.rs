//! Duplex channel transport.
//!
//! A [`Dialer`] turns a URL into a [`ChannelLink`]: a pair of text-frame
//! channels bridged to the socket by an internal task. This is a thin layer;
//! protocol logic stays in the Sans-IO connection state machine.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::cookie::{CookieStore, Jar};
use tokio::{net::TcpStream, sync::mpsc, task::AbortHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::COOKIE},
    },
};
use url::Url;

use crate::error::TransportError;

/// Buffered text frames per direction.
pub const LINK_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An established duplex connection.
///
/// `inbound` yielding `None` means the peer closed the connection. Dropping
/// the link stops the bridging task, if any.
pub struct ChannelLink {
    /// Frames to the server.
    pub outbound: mpsc::Sender<String>,
    /// Frames from the server.
    pub inbound: mpsc::Receiver<String>,
    abort: Option<AbortHandle>,
}

impl ChannelLink {
    /// Link over existing channels.
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self { outbound, inbound, abort: None }
    }

    /// Abort `handle` when the link is dropped.
    #[must_use]
    pub fn with_abort(mut self, handle: AbortHandle) -> Self {
        self.abort = Some(handle);
        self
    }
}

impl Drop for ChannelLink {
    fn drop(&mut self) {
        if let Some(handle) = self.abort.take() {
            handle.abort();
        }
    }
}

/// Opens duplex connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `url` and complete the handshake.
    async fn dial(&self, url: &Url) -> Result<ChannelLink, TransportError>;
}

/// WebSocket dialer over `tokio-tungstenite`.
///
/// Forwards the REST cookie jar's cookies on the handshake request, which is
/// how the backend authenticates the socket.
#[derive(Default)]
pub struct WsDialer {
    jar: Option<Arc<Jar>>,
}

impl WsDialer {
    /// Dialer without credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialer that authenticates with the cookies in `jar`.
    pub fn with_jar(jar: Arc<Jar>) -> Self {
        Self { jar: Some(jar) }
    }

    fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        let jar = self.jar.as_ref()?;
        let mut http_url = url.clone();
        let scheme = if url.scheme() == "wss" { "https" } else { "http" };
        http_url.set_scheme(scheme).ok()?;

        let cookies = jar.cookies(&http_url)?;
        HeaderValue::from_str(cookies.to_str().ok()?).ok()
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &Url) -> Result<ChannelLink, TransportError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        if let Some(cookies) = self.cookie_header(url) {
            request.headers_mut().insert(COOKIE, cookies);
        }

        let (ws, _response) =
            connect_async(request).await.map_err(|e| TransportError::Handshake(e.to_string()))?;

        let (to_server_tx, to_server_rx) = mpsc::channel::<String>(LINK_CAPACITY);
        let (from_server_tx, from_server_rx) = mpsc::channel::<String>(LINK_CAPACITY);

        let handle = tokio::spawn(run_socket(ws, to_server_rx, from_server_tx));

        Ok(ChannelLink::new(to_server_tx, from_server_rx).with_abort(handle.abort_handle()))
    }
}

/// Bridge the socket and the link channels until either side closes.
async fn run_socket(
    ws: WsStream,
    mut to_server: mpsc::Receiver<String>,
    from_server: mpsc::Sender<String>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outgoing = to_server.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::debug!("socket write failed: {}", e);
                        break;
                    }
                },
                None => {
                    let _ = sink.close().await;
                    break;
                },
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if from_server.send(text.as_str().to_owned()).await.is_err() {
                        break;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!("socket closed by peer: {:?}", frame);
                    break;
                },
                // Control frames are answered by tungstenite; binary is unused
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    tracing::debug!("socket read failed: {}", e);
                    break;
                },
                None => break,
            },
        }
    }
}
