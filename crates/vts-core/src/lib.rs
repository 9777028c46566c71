//! Shared, authenticated connection to a VTube Studio instance.
//!
//! Several callers attach to one [`VtsConnection`]. The first attach opens the
//! transport, the connection authenticates itself and every caller receives
//! status reports. Calls are correlated with responses by request id and
//! resolve exactly once. The last detach closes everything.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vts_core::{EndpointConfig, MemoryTokenStore, VtsConnection};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EndpointConfig::new("ws://localhost:8001", "My Plugin", "Me");
//! let connection = VtsConnection::websocket(config, Arc::new(MemoryTokenStore::new()));
//!
//! let _status = connection.attach("node-1").await?;
//! if connection.wait_until_ready(Duration::from_secs(30)).await {
//!     let stats = connection.call("StatisticsRequest", None).await?;
//!     println!("{}", stats.data);
//! }
//! connection.detach("node-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod pending;
pub mod status;
pub mod store;
pub mod subscribers;
pub mod timers;

mod error;

#[cfg(test)]
mod tests;

pub use config::{Config, Directories, EndpointConfig, Timings};
pub use connection::{
    ConnectionOptions, ConnectionSnapshot, DEFAULT_REQUEST_TIMEOUT, HandshakePhase,
    StatusReceiver, TransportState, VtsConnection,
};
pub use error::{Error, Result};
pub use status::{ConnectionStatus, Fill, Shape, Status, StatusText};
pub use store::{FileTokenStore, MemoryTokenStore, StoreError, TOKEN_KEY, TokenStore};
pub use subscribers::CallerId;

pub use vts_rpc::{
    ApiError, CallError, ClientError, Connector, RequestId, ResponseEnvelope, TransportError,
    WebSocketConnector,
};
