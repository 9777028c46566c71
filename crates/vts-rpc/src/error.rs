//! Error types returned to callers of the API.
//!
//! Two kinds reach a caller: [`ApiError`] when the peer explicitly reported a
//! failure, and [`ClientError`] for everything that went wrong locally.

use crate::protocol::{ApiErrorPayload, ResponseEnvelope};

/// Errors raised by a transport implementation
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection closed")]
    Closed,
}

/// Local failures of a call
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Client not ready")]
    NotReady,

    #[error("Request timeout")]
    Timeout,

    #[error("Error sending request: {0}")]
    SendFailed(#[source] TransportError),

    #[error("Websocket disconnected")]
    Disconnected,

    #[error("Connection manager stopped")]
    Terminated,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Failure reported by the peer through an `APIError` frame
#[derive(Debug, Clone, thiserror::Error)]
#[error("API error {code}: {message}")]
pub struct ApiError {
    pub code: i32,
    pub message: String,
    /// The complete frame as received
    pub original: ResponseEnvelope,
}

impl ApiError {
    #[must_use]
    pub fn new(payload: ApiErrorPayload, original: ResponseEnvelope) -> Self {
        Self {
            code: payload.error_id,
            message: payload.message,
            original,
        }
    }
}

/// Outcome error of a call
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl CallError {
    /// Peer error code, if the peer reported one
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            CallError::Api(e) => Some(e.code),
            CallError::Client(_) => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Client(ClientError::Timeout))
    }
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        CallError::Client(ClientError::Json(e))
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
