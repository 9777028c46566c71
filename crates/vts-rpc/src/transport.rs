//! Message transports.
//!
//! A transport is a pair of text-frame halves: a sink for outbound frames and
//! a stream of inbound frames. The stream ending means the peer closed the
//! connection. [`WebSocketConnector`] produces them from a `ws://` endpoint;
//! [`memory_transport`] produces an in-process pair for tests and embedding.

use std::future::{self, Future};
use std::pin::Pin;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, protocol::Message};
use tracing::debug;

use crate::error::TransportError;

/// Outbound half of a transport
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a transport
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// A connected transport, split for concurrent send/receive.
pub struct TransportParts {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl TransportParts {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<String, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<String, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for TransportParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportParts").finish_non_exhaustive()
    }
}

/// Opens transports to an endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection to `endpoint`.
    ///
    /// Returns [`TransportError::InvalidEndpoint`] when the address itself is
    /// unusable, so the caller can tell configuration mistakes from network
    /// failures.
    fn connect(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<TransportParts, TransportError>> + Send;
}

/// Connector for `ws://` and `wss://` endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<TransportParts, TransportError> {
        validate_endpoint(endpoint)?;
        debug!(endpoint = %endpoint, "Connecting to WebSocket");

        let (ws, _) = connect_async(endpoint).await.map_err(|e| match e {
            WsError::Url(e) => TransportError::InvalidEndpoint(e.to_string()),
            other => TransportError::WebSocket(other),
        })?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));

        // Ping/pong is answered by tungstenite; close frames end the stream
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(data)) => Some(Ok(String::from_utf8_lossy(&data).into_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::WebSocket(e))),
            })
        });

        debug!(endpoint = %endpoint, "WebSocket connected");
        Ok(TransportParts::new(sink, stream))
    }
}

/// Reject addresses that can never be a WebSocket endpoint.
///
/// # Errors
///
/// Returns [`TransportError::InvalidEndpoint`] for anything other than a
/// non-empty `ws://` or `wss://` URL.
pub fn validate_endpoint(endpoint: &str) -> Result<(), TransportError> {
    let rest = endpoint
        .strip_prefix("ws://")
        .or_else(|| endpoint.strip_prefix("wss://"));

    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(TransportError::InvalidEndpoint(endpoint.to_string())),
    }
}

/// Peer side of an in-memory transport.
///
/// `outbound` yields every frame the client sent and returns `None` once the
/// client closed its half. Sending on `inbound` delivers a frame (or an error)
/// to the client; dropping it closes the connection from the peer side.
#[derive(Debug)]
pub struct MemoryPeer {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl MemoryPeer {
    /// Deliver a text frame to the client.
    ///
    /// Returns `false` if the client side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Ok(text.into())).is_ok()
    }

    /// Next frame sent by the client, `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }
}

/// Create a connected in-memory transport pair.
#[must_use]
pub fn memory_transport() -> (TransportParts, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<String, TransportError>>();

    let sink = futures_util::sink::unfold(out_tx, |tx, frame: String| async move {
        tx.send(frame).map_err(|_| TransportError::Closed)?;
        Ok::<_, TransportError>(tx)
    });
    let stream = futures_util::stream::unfold(in_rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    (
        TransportParts::new(sink, stream),
        MemoryPeer {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}
