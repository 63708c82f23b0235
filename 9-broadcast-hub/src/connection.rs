//! Transport-agnostic view of one participant's connection.
//!
//! A connection is split in two: the [`Connection`] half can be shared
//! (the hub writes to it during fan-out) while the [`Inbound`] half stays
//! with the handler that owns the read side.

use std::{fmt, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

/// Stable identity of a connection, used as the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for ConnectionId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("invalid message payload: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
    #[error("send timed out after {0:?}")]
    TimedOut(Duration),
}

/// Write side of a connection.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> &ConnectionId;

    async fn send(&self, message: &Message) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Read side of a connection.
#[async_trait]
pub trait Inbound: Send {
    /// Waits for the next message. Any error is terminal for the connection.
    async fn receive(&mut self) -> Result<Message, TransportError>;
}
