//! Connection handles.
//!
//! A [`ConnectionHandle`] is how everything outside a connection's own
//! lifecycle talks to it. Writes go into a bounded queue drained by the
//! connection's single writer task and never block: a full queue is
//! reported as an error rather than waited on.

use bytes::Bytes;
use std::sync::Arc;
use tenvis_beacon_transport::ConnectionId;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// An item for a connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded message.
    Frame(Bytes),
    /// A keepalive probe.
    Ping,
}

/// Delivery errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The peer is not draining its queue fast enough.
    #[error("Outbound queue full")]
    QueueFull,

    /// The connection's writer has stopped.
    #[error("Connection closed")]
    Closed,
}

impl<T> From<mpsc::error::TrySendError<T>> for DeliveryError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        }
    }
}

/// A cloneable reference to a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
    shutdown: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle and the queue its writer drains.
    #[must_use]
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            outbound,
            shutdown: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an encoded frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is full or the writer has stopped.
    pub fn send_frame(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.outbound.try_send(Outbound::Frame(frame))?;
        Ok(())
    }

    /// Queue a keepalive probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is full or the writer has stopped.
    pub fn ping(&self) -> Result<(), DeliveryError> {
        self.outbound.try_send(Outbound::Ping)?;
        Ok(())
    }

    /// Ask the writer to close the connection.
    ///
    /// Takes effect ahead of anything still queued.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Check whether the writer has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    pub(crate) fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }
}
