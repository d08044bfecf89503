//! Transport abstraction traits for Beacon.
//!
//! A connection is handed to the core already upgraded. The core splits it
//! into a write half, owned by a single writer task, and a read half, owned
//! by the session's read loop.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Allocator for connection IDs. Zero is never handed out.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier for a live connection.
///
/// IDs are allocated from a process-wide counter and never reused, so they
/// are safe to use as map keys after the connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A complete data frame.
    Frame(Bytes),
    /// Transport-level liveness traffic (ping or pong).
    Heartbeat,
}

/// The write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one encoded message frame.
    async fn send_frame(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Send a keepalive probe.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The read half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError>;
}

/// An accepted, already-upgraded connection.
pub trait Connection: Send + 'static {
    /// Write half.
    type Sink: FrameSink + 'static;
    /// Read half.
    type Stream: FrameStream + 'static;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Split into independently owned halves.
    fn split(self) -> (Self::Sink, Self::Stream);
}
