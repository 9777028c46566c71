//! Transport session task.
//!
//! Single responsibility: own one physical connection, pump outbound frames
//! into it and report inbound frames, errors and closure to the connection
//! actor. No knowledge of requests, authentication or reconnection.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vts_rpc::{RequestId, TransportError, TransportParts};

use super::actor::Event;

/// Upper bound for the close handshake when the owner drops a session
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifies one connection attempt; events from older sessions are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SessionId(pub(crate) u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events reported by a session task
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Frame(String),
    Error(TransportError),
    SendFailed {
        request_id: RequestId,
        error: TransportError,
    },
    Closed,
}

/// A serialized request on its way to the socket
#[derive(Debug)]
pub(crate) struct Outbound {
    pub request_id: RequestId,
    pub text: String,
}

/// Owner's handle to a running session task.
///
/// Dropping (or [`close`](Self::close)-ing) the handle closes the transport
/// without a `Closed` event being reported.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    id: SessionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub(crate) fn spawn(
        id: SessionId,
        parts: TransportParts,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(id, parts, outbound_rx, events));
        Self { id, outbound, task }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Outbound> {
        self.outbound.clone()
    }

    /// Stop the session. The task closes the sink once its outbound queue
    /// is gone and reports nothing further.
    pub(crate) fn close(self) {
        debug!(session = %self.id, finished = self.task.is_finished(), "Closing session");
        drop(self.outbound);
    }
}

async fn run(
    id: SessionId,
    parts: TransportParts,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<Event>,
) {
    let TransportParts {
        mut sink,
        mut stream,
    } = parts;
    let report = |event: SessionEvent| {
        events
            .send(Event::Session { session: id, event })
            .is_ok()
    };

    debug!(session = %id, "Session started");

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(Outbound { request_id, text }) = frame else {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    debug!(session = %id, "Session closed by owner");
                    return;
                };
                if let Err(error) = sink.send(text).await {
                    // The sink is unusable after a failed send
                    warn!(session = %id, %request_id, error = %error, "Failed to send frame");
                    report(SessionEvent::SendFailed { request_id, error });
                    break;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(text)) => {
                    if !report(SessionEvent::Frame(text)) {
                        return;
                    }
                }
                Some(Err(error)) => {
                    // Read errors are fatal for the underlying socket
                    warn!(session = %id, error = %error, "Transport error");
                    report(SessionEvent::Error(error));
                    break;
                }
                None => break,
            }
        }
    }

    debug!(session = %id, "Session ended");
    report(SessionEvent::Closed);
}
