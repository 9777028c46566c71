//! Connection to one VTube Studio endpoint.
//!
//! [`VtsConnection`] is a cheap, cloneable handle to a background task that
//! owns the transport, authenticates, correlates requests with responses
//! and reconnects while at least one caller is attached.

mod actor;
mod handshake;
mod session;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use vts_rpc::{ClientError, Connector, ResponseEnvelope, WebSocketConnector};

pub use actor::{ConnectionSnapshot, TransportState};
pub use handshake::HandshakePhase;

use crate::config::{EndpointConfig, Timings};
use crate::status::{ConnectionStatus, Status};
use crate::store::TokenStore;
use crate::subscribers::CallerId;
use crate::timers::TimerRegistry;
use actor::{Command, ConnectionActor};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Default per-call timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Status reports for one attached caller
pub type StatusReceiver = mpsc::UnboundedReceiver<Status>;

/// Tunables of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub timings: Timings,
    /// Timeout for calls that do not specify one, including handshake requests
    pub request_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Handle to a connection manager task.
///
/// The task stops when [`shutdown`](Self::shutdown) is called or when the
/// last handle is dropped; further calls then fail with
/// [`ClientError::Terminated`].
#[derive(Debug, Clone)]
pub struct VtsConnection {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    request_timeout: Duration,
}

impl VtsConnection {
    /// Start a manager for `config` over WebSocket with default options.
    pub fn websocket<S: TokenStore>(config: EndpointConfig, store: Arc<S>) -> Self {
        Self::spawn(
            config,
            ConnectionOptions::default(),
            WebSocketConnector::new(),
            store,
        )
    }

    /// Start a manager task on the current runtime.
    ///
    /// Nothing is opened until the first caller attaches.
    pub fn spawn<C: Connector, S: TokenStore>(
        config: EndpointConfig,
        options: ConnectionOptions,
        connector: C,
        store: Arc<S>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let actor = ConnectionActor::new(
            config,
            options.timings,
            options.request_timeout,
            Arc::new(connector),
            store,
            event_tx,
            TimerRegistry::new(timer_tx),
            status_tx,
        );
        tokio::spawn(actor.run(command_rx, event_rx, timer_rx));

        Self {
            commands: command_tx,
            status: status_rx,
            request_timeout: options.request_timeout,
        }
    }

    async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Terminated)
    }

    /// Register interest in the connection. The first caller opens it.
    ///
    /// Attaching an already attached caller routes its status reports to the
    /// returned receiver instead of the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Terminated`] if the manager has stopped.
    pub async fn attach(&self, caller: impl Into<CallerId>) -> Result<StatusReceiver, ClientError> {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (ack, done) = oneshot::channel();
        self.send(Command::Attach {
            caller: caller.into(),
            status_tx,
            ack,
        })
        .await?;
        done.await.map_err(|_| ClientError::Terminated)?;
        Ok(status_rx)
    }

    /// Withdraw interest. The last caller to detach closes the connection,
    /// failing every pending call with [`ClientError::Disconnected`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Terminated`] if the manager has stopped.
    pub async fn detach(&self, caller: impl Into<CallerId>) -> Result<(), ClientError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Detach {
            caller: caller.into(),
            ack,
        })
        .await?;
        done.await.map_err(|_| ClientError::Terminated)
    }

    /// Send a request with the default timeout and wait for its response.
    ///
    /// # Errors
    ///
    /// Fails with [`CallError::Api`](vts_rpc::CallError::Api) if the peer
    /// answered with an error frame, and with
    /// [`CallError::Client`](vts_rpc::CallError::Client) if the transport is
    /// not open, the request could not be sent, the connection dropped or the
    /// timeout elapsed.
    pub async fn call(
        &self,
        message_type: &str,
        data: Option<Value>,
    ) -> vts_rpc::Result<ResponseEnvelope> {
        self.call_with_timeout(message_type, data, self.request_timeout)
            .await
    }

    /// Like [`call`](Self::call) with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_with_timeout(
        &self,
        message_type: &str,
        data: Option<Value>,
        timeout: Duration,
    ) -> vts_rpc::Result<ResponseEnvelope> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Call {
            message_type: message_type.to_string(),
            data,
            timeout,
            reply,
        })
        .await?;
        response.await.map_err(|_| ClientError::Terminated)?
    }

    /// Send a request and decode the response `data` as `T`.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call); additionally fails with
    /// [`ClientError::UnexpectedResponse`] if `data` does not match `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        message_type: &str,
        data: Option<Value>,
    ) -> vts_rpc::Result<T> {
        let response = self.call(message_type, data).await?;
        response.data_as::<T>().map_err(|e| {
            ClientError::UnexpectedResponse(format!("{}: {e}", response.message_type)).into()
        })
    }

    /// Current coarse status. Informational only: calls are gated on the
    /// transport being open, not on this value.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch coarse status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Wait until the connection is authenticated.
    ///
    /// Returns `false` if `timeout` elapsed or the manager stopped first.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut status = self.status.clone();
        let ready = status.wait_for(|status| *status == ConnectionStatus::Ready);
        matches!(tokio::time::timeout(timeout, ready).await, Ok(Ok(_)))
    }

    /// Inspect the manager's internal state.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Terminated`] if the manager has stopped.
    pub async fn snapshot(&self) -> Result<ConnectionSnapshot, ClientError> {
        let (reply, snapshot) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        snapshot.await.map_err(|_| ClientError::Terminated)
    }

    /// Close the connection and stop the manager task.
    ///
    /// Pending calls fail with [`ClientError::Disconnected`]. Idempotent.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.send(Command::Shutdown { ack }).await.is_ok() {
            let _ = done.await;
        }
    }

    /// `true` once the manager task has stopped
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.commands.is_closed()
    }
}
