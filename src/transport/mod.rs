// Upstream connection lifecycle and raw framing

mod backoff;
mod channel;
mod config;
mod connector;
mod nats;
mod websocket;

pub use backoff::{BackoffKind, ReconnectConfig};
pub use channel::ChannelDialer;
pub use config::{TransportConfig, TransportKind};
pub use connector::TransportConnector;
pub use nats::NatsDialer;
pub use websocket::WebSocketDialer;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Raw payload as received from the network layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

/// Connection status visible to consumers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// First connection attempt in progress
    Connecting,
    Connected,
    /// Waiting for / performing retry number `attempt`
    Reconnecting { attempt: u32 },
    /// Retry cap exceeded or connector shut down; no further attempts
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting { .. } => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Reconnecting { attempt } => write!(f, "reconnecting ({})", attempt),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Items delivered by the connector, in arrival order
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// Status transition
    Status(ConnectionStatus),
    /// A new session started after a gap; downstream state may be incomplete
    Resync { session_id: Uuid },
    /// Raw payload
    Frame(Frame),
}

/// Connection errors; they drive the reconnect policy
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Could not establish the connection
    Connect(String),
    /// Established stream failed
    Stream(String),
    /// Peer closed the connection
    Closed,
    /// Dialer has nothing to connect to
    Refused(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Connect(reason) => write!(f, "connect failed: {}", reason),
            ConnectionError::Stream(reason) => write!(f, "stream error: {}", reason),
            ConnectionError::Closed => write!(f, "connection closed by peer"),
            ConnectionError::Refused(reason) => write!(f, "connection refused: {}", reason),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Stream of frames for one connection session
pub type FrameStream = BoxStream<'static, Result<Frame, ConnectionError>>;

/// Opens one connection session to the upstream event stream.
///
/// The connector calls `dial` again for every reconnect. A session ends when
/// the returned stream yields `None` or an error.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Human-readable target, for logs
    fn describe(&self) -> String;

    async fn dial(&self) -> Result<FrameStream, ConnectionError>;
}
