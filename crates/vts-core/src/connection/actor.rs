//! The connection actor.
//!
//! One task owns every piece of per-connection state: subscribers, pending
//! calls, timers, the transport session and the handshake. Commands from
//! [`VtsConnection`](super::VtsConnection) handles, transport events and timer
//! fires are processed one at a time, so no two of them ever observe each
//! other half-done.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use vts_rpc::{
    ApiError, ClientError, Connector, RequestEnvelope, RequestId, ResponseEnvelope,
    TransportError, TransportParts,
};

use super::handshake::{Handshake, HandshakePhase, HandshakeStep};
use super::session::{Outbound, SessionEvent, SessionHandle, SessionId};
use crate::config::{EndpointConfig, Timings};
use crate::pending::PendingCalls;
use crate::status::{ConnectionStatus, Status, StatusText};
use crate::store::TokenStore;
use crate::subscribers::{CallerId, SubscriberRegistry};
use crate::timers::{TimerId, TimerKind, TimerRegistry};

pub(crate) type CallReply = oneshot::Sender<vts_rpc::Result<ResponseEnvelope>>;

/// Requests from connection handles
#[derive(Debug)]
pub(crate) enum Command {
    Attach {
        caller: CallerId,
        status_tx: mpsc::UnboundedSender<Status>,
        ack: oneshot::Sender<()>,
    },
    Detach {
        caller: CallerId,
        ack: oneshot::Sender<()>,
    },
    Call {
        message_type: String,
        data: Option<Value>,
        timeout: Duration,
        reply: CallReply,
    },
    Snapshot {
        reply: oneshot::Sender<ConnectionSnapshot>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Completions of work the actor started elsewhere
#[derive(Debug)]
pub(crate) enum Event {
    Connected {
        session: SessionId,
        parts: TransportParts,
    },
    ConnectFailed {
        session: SessionId,
        error: TransportError,
    },
    Session {
        session: SessionId,
        event: SessionEvent,
    },
}

/// Who is waiting for a response
#[derive(Debug)]
pub(crate) enum Responder {
    Caller(CallReply),
    Handshake { step: HandshakeStep, epoch: u64 },
}

#[derive(Debug)]
enum TransportSlot {
    Closed,
    Connecting(SessionId),
    Open(SessionHandle),
}

impl TransportSlot {
    fn state(&self) -> TransportState {
        match self {
            TransportSlot::Closed => TransportState::Closed,
            TransportSlot::Connecting(_) => TransportState::Connecting,
            TransportSlot::Open(_) => TransportState::Open,
        }
    }

    fn outbound(&self) -> Option<mpsc::UnboundedSender<Outbound>> {
        match self {
            TransportSlot::Open(session) => Some(session.sender()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Closed,
    Connecting,
    Open,
}

/// Point-in-time view of a connection's internals
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub transport: TransportState,
    pub handshake: HandshakePhase,
    pub status: Option<Status>,
    pub subscribers: usize,
    pub pending_calls: usize,
    pub timers: usize,
}

pub(crate) struct ConnectionActor<C, S> {
    pub(super) config: Arc<EndpointConfig>,
    pub(super) timings: Timings,
    pub(super) request_timeout: Duration,
    connector: Arc<C>,
    pub(super) store: Arc<S>,
    events_tx: mpsc::UnboundedSender<Event>,
    subscribers: SubscriberRegistry,
    pending: PendingCalls<Responder>,
    pub(super) timers: TimerRegistry,
    transport: TransportSlot,
    next_session: u64,
    pub(super) handshake: Handshake,
    last_status: Option<Status>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl<C: Connector, S: TokenStore> ConnectionActor<C, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: EndpointConfig,
        timings: Timings,
        request_timeout: Duration,
        connector: Arc<C>,
        store: Arc<S>,
        events_tx: mpsc::UnboundedSender<Event>,
        timers: TimerRegistry,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            timings,
            request_timeout,
            connector,
            store,
            events_tx,
            subscribers: SubscriberRegistry::new(),
            pending: PendingCalls::new(),
            timers,
            transport: TransportSlot::Closed,
            next_session: 1,
            handshake: Handshake::default(),
            last_status: None,
            status_tx,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut timer_rx: mpsc::UnboundedReceiver<TimerId>,
    ) {
        info!(endpoint = %self.config.endpoint, "Connection manager started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("All handles dropped");
                        self.close_transport();
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
                Some(id) = timer_rx.recv() => self.handle_timer(id),
            }
        }

        info!(endpoint = %self.config.endpoint, "Connection manager stopped");
    }

    /// Returns `false` once the actor should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Attach {
                caller,
                status_tx,
                ack,
            } => {
                if let Some(status) = self.last_status {
                    let _ = status_tx.send(status);
                }
                self.subscribers.attach(caller, status_tx);
                if matches!(self.transport, TransportSlot::Closed) {
                    self.connect();
                }
                let _ = ack.send(());
            }
            Command::Detach { caller, ack } => {
                if self.subscribers.detach(&caller) && self.subscribers.is_empty() {
                    info!("Last caller detached");
                    self.close_transport();
                }
                let _ = ack.send(());
            }
            Command::Call {
                message_type,
                data,
                timeout,
                reply,
            } => self.dispatch(&message_type, data, timeout, Responder::Caller(reply)),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { ack } => {
                self.close_transport();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected { session, parts } => {
                if !matches!(self.transport, TransportSlot::Connecting(id) if id == session) {
                    debug!(%session, "Discarding stale connection");
                    return;
                }
                self.transport =
                    TransportSlot::Open(SessionHandle::spawn(session, parts, self.events_tx.clone()));
                info!(%session, endpoint = %self.config.endpoint, "Connected");
                self.report(StatusText::Connected);
                self.check_active_state();
            }
            Event::ConnectFailed { session, error } => {
                if !matches!(self.transport, TransportSlot::Connecting(id) if id == session) {
                    debug!(%session, error = %error, "Ignoring stale connect failure");
                    return;
                }
                if let TransportError::InvalidEndpoint(endpoint) = &error {
                    warn!(%endpoint, "Invalid endpoint, not retrying");
                    self.transport = TransportSlot::Closed;
                    self.report(StatusText::InvalidConfig);
                    return;
                }
                warn!(%session, error = %error, "Connect failed");
                self.report(StatusText::Error);
                self.transport_lost();
            }
            Event::Session { session, event } => {
                if !self.is_current(session) {
                    trace!(%session, ?event, "Ignoring event from stale session");
                    return;
                }
                match event {
                    SessionEvent::Frame(text) => self.handle_frame(&text),
                    SessionEvent::Error(error) => {
                        warn!(%session, error = %error, "Transport error");
                        self.report(StatusText::Error);
                    }
                    SessionEvent::SendFailed { request_id, error } => {
                        self.settle(&request_id, Err(ClientError::SendFailed(error).into()));
                    }
                    SessionEvent::Closed => {
                        info!(%session, "Connection closed by peer");
                        self.transport_lost();
                    }
                }
            }
        }
    }

    fn handle_timer(&mut self, id: TimerId) {
        let Some(kind) = self.timers.fire(id) else {
            trace!(?id, "Ignoring stale timer");
            return;
        };

        match kind {
            TimerKind::CallTimeout(request_id) => {
                if let Some(call) = self.pending.take(&request_id) {
                    debug!(%request_id, "Request timed out");
                    self.deliver(call.responder, Err(ClientError::Timeout.into()));
                }
            }
            TimerKind::Reconnect => {
                if matches!(self.transport, TransportSlot::Closed) && !self.subscribers.is_empty() {
                    info!("Reconnecting");
                    self.connect();
                }
            }
            TimerKind::CheckActive => self.check_active_state(),
            TimerKind::Authenticate => self.try_auth(),
        }
    }

    /// Send a request over the open transport and register its responder.
    pub(super) fn dispatch(
        &mut self,
        message_type: &str,
        data: Option<Value>,
        timeout: Duration,
        responder: Responder,
    ) {
        let Some(outbound) = self.transport.outbound() else {
            debug!(message_type, "Rejecting call, transport not open");
            self.deliver(responder, Err(ClientError::NotReady.into()));
            return;
        };

        let request_id = self.fresh_request_id();
        let envelope = RequestEnvelope::new(message_type, request_id.clone(), data);
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                self.deliver(responder, Err(e.into()));
                return;
            }
        };

        let timer = self
            .timers
            .schedule(TimerKind::CallTimeout(request_id.clone()), timeout);
        if let Err(call) = self.pending.register(request_id.clone(), responder, timer) {
            // fresh_request_id never returns an id that is still pending
            self.timers.cancel(call.timeout);
            let error = ClientError::UnexpectedResponse(format!("duplicate request id {request_id}"));
            self.deliver(call.responder, Err(error.into()));
            return;
        }

        debug!(%request_id, message_type, "Sending request");
        let frame = Outbound {
            request_id: request_id.clone(),
            text,
        };
        if outbound.send(frame).is_err() {
            self.settle(
                &request_id,
                Err(ClientError::SendFailed(TransportError::Closed).into()),
            );
        }
    }

    fn fresh_request_id(&self) -> RequestId {
        loop {
            let id = RequestId::from(Uuid::new_v4().simple().to_string());
            if !self.pending.contains(&id) {
                return id;
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let envelope: ResponseEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.protocol_violation(&format!("unparsable frame: {e}"));
                return;
            }
        };
        if !envelope.is_api_family() {
            self.protocol_violation(&format!("unexpected apiName {:?}", envelope.api_name));
            return;
        }
        let error = match envelope.error_payload() {
            None => None,
            Some(Ok(payload)) => Some(payload),
            Some(Err(e)) => {
                self.protocol_violation(&format!("malformed error payload: {e}"));
                return;
            }
        };
        let code = error.as_ref().map(|payload| payload.error_id);

        match envelope.request_id.clone() {
            Some(request_id) if self.pending.contains(&request_id) => {
                let outcome = match error {
                    Some(payload) => Err(ApiError::new(payload, envelope).into()),
                    None => Ok(envelope),
                };
                self.settle(&request_id, outcome);
            }
            request_id => {
                debug!(
                    request_id = ?request_id.as_ref().map(RequestId::as_str),
                    message_type = %envelope.message_type,
                    "Dropping unmatched frame"
                );
            }
        }

        if let Some(code) = code {
            self.handle_error_code(code);
        }
    }

    /// Resolve the pending call for `request_id`, if it is still pending.
    fn settle(&mut self, request_id: &RequestId, outcome: vts_rpc::Result<ResponseEnvelope>) {
        let Some(call) = self.pending.take(request_id) else {
            debug!(%request_id, "No pending call");
            return;
        };
        self.timers.cancel(call.timeout);
        self.deliver(call.responder, outcome);
    }

    fn deliver(&mut self, responder: Responder, outcome: vts_rpc::Result<ResponseEnvelope>) {
        match responder {
            Responder::Caller(reply) => {
                let _ = reply.send(outcome);
            }
            Responder::Handshake { step, epoch } => self.handshake_result(step, epoch, outcome),
        }
    }

    fn drain_pending(&mut self) {
        let drained = self.pending.drain();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing pending calls");
        }
        for (_, call) in drained {
            self.timers.cancel(call.timeout);
            self.deliver(call.responder, Err(ClientError::Disconnected.into()));
        }
    }

    fn connect(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        self.timers.cancel_where(|kind| matches!(kind, TimerKind::Reconnect));

        let session = SessionId(self.next_session);
        self.next_session += 1;
        self.transport = TransportSlot::Connecting(session);
        self.report(StatusText::Connecting);
        info!(%session, endpoint = %self.config.endpoint, "Connecting");

        let connector = Arc::clone(&self.connector);
        let endpoint = self.config.endpoint.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match connector.connect(&endpoint).await {
                Ok(parts) => Event::Connected { session, parts },
                Err(error) => Event::ConnectFailed { session, error },
            };
            let _ = events.send(event);
        });
    }

    fn is_current(&self, session: SessionId) -> bool {
        matches!(&self.transport, TransportSlot::Open(handle) if handle.id() == session)
    }

    /// Unsolicited loss of the transport: fail everything in flight and come
    /// back later if anyone is still attached.
    fn transport_lost(&mut self) {
        if let TransportSlot::Open(session) =
            std::mem::replace(&mut self.transport, TransportSlot::Closed)
        {
            session.close();
        }
        self.report(StatusText::Disconnected);
        self.reset_handshake();
        self.drain_pending();

        if !self.subscribers.is_empty() {
            let delay = self.timings.reconnect();
            info!(?delay, "Scheduling reconnect");
            self.timers.schedule(TimerKind::Reconnect, delay);
        }
    }

    fn protocol_violation(&mut self, reason: &str) {
        warn!(reason, "Protocol violation, dropping connection");
        self.transport_lost();
    }

    /// Deliberate teardown. Nothing scheduled before this point runs after it.
    fn close_transport(&mut self) {
        let previous = std::mem::replace(&mut self.transport, TransportSlot::Closed);
        self.reset_handshake();
        self.drain_pending();
        let cancelled = self.timers.cancel_all();
        if let TransportSlot::Open(session) = previous {
            session.close();
        }
        self.last_status = None;
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        info!(cancelled, "Connection shut down");
    }

    pub(super) fn report(&mut self, text: StatusText) {
        let status = Status::from(text);
        debug!(status = %text, subscribers = self.subscribers.len(), "Status");
        self.last_status = Some(status);
        self.subscribers.broadcast(status);
        self.status_tx.send_replace(text.connection_status());
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            transport: self.transport.state(),
            handshake: self.handshake.phase(),
            status: self.last_status,
            subscribers: self.subscribers.len(),
            pending_calls: self.pending.len(),
            timers: self.timers.len(),
        }
    }
}
