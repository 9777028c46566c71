//! VTube Studio public API protocol definitions and transports.
//!
//! This crate provides the wire types, boundary error types and transports
//! used by `vts-core` to talk to a VTube Studio instance.
//!
//! # Architecture
//!
//! - [`protocol`]: Request/response envelopes, constants and handshake payloads
//! - [`transport`]: The [`Connector`] trait, WebSocket and in-memory transports
//! - [`error`]: [`ClientError`], [`ApiError`] and the [`CallError`] union
//!
//! # Example
//!
//! ```no_run
//! use vts_rpc::{Connector, RequestEnvelope, WebSocketConnector};
//! use futures_util::SinkExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut parts = WebSocketConnector::new().connect("ws://localhost:8001").await?;
//! let request = RequestEnvelope::new("APIStateRequest", "1".into(), None);
//! parts.sink.send(serde_json::to_string(&request)?).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export error types
pub use error::{ApiError, CallError, ClientError, Result, TransportError};

// Re-export protocol types
pub use protocol::{
    API_ERROR, API_NAME, API_NOT_ACTIVE, API_STATE_REQUEST, API_VERSION, AUTHENTICATION_REQUEST,
    AUTHENTICATION_TOKEN_REQUEST, ApiErrorPayload, ApiStateData, AuthenticationData,
    AuthenticationParams, AuthenticationTokenData, INVALID_TOKEN, RequestEnvelope, RequestId,
    ResponseEnvelope,
};

// Re-export transport types
pub use transport::{
    Connector, FrameSink, FrameStream, MemoryPeer, TransportParts, WebSocketConnector,
    memory_transport, validate_endpoint,
};
