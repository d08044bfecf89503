//! In-memory transport.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] and the
//! [`MemoryClient`] that drives it. Used to exercise the relay without
//! sockets.

use async_trait::async_trait;
use beacon_protocol::{codec, Message};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{Connection, FrameSink, FrameStream, Incoming, TransportError};

/// What the server wrote to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// An encoded message.
    Frame(Bytes),
    /// A keepalive probe.
    Ping,
    /// The server closed the connection.
    Close,
}

enum ClientFrame {
    Frame(Bytes),
    Pong,
}

/// Create a connected in-memory pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryClient) {
    let (to_client, from_server) = mpsc::unbounded_channel();
    let (to_server, from_client) = mpsc::unbounded_channel();
    let broken = Arc::new(AtomicBool::new(false));

    let connection = MemoryConnection {
        to_client,
        from_client,
        broken: Arc::clone(&broken),
    };
    let client = MemoryClient {
        to_server: Some(to_server),
        from_server,
        broken,
    };
    (connection, client)
}

/// Server side of an in-memory pair.
pub struct MemoryConnection {
    to_client: mpsc::UnboundedSender<ServerFrame>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
    broken: Arc<AtomicBool>,
}

impl Connection for MemoryConnection {
    type Sink = MemorySink;
    type Stream = MemoryStream;

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn split(self) -> (MemorySink, MemoryStream) {
        (
            MemorySink {
                to_client: self.to_client,
                broken: self.broken,
            },
            MemoryStream {
                from_client: self.from_client,
            },
        )
    }
}

/// Write half of a [`MemoryConnection`].
pub struct MemorySink {
    to_client: mpsc::UnboundedSender<ServerFrame>,
    broken: Arc<AtomicBool>,
}

impl MemorySink {
    fn write(&self, frame: ServerFrame) -> Result<(), TransportError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("connection broken".into()));
        }
        self.to_client
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.write(ServerFrame::Frame(data))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.write(ServerFrame::Ping)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.to_client.send(ServerFrame::Close);
        Ok(())
    }
}

/// Read half of a [`MemoryConnection`].
pub struct MemoryStream {
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        Ok(self.from_client.recv().await.map(|frame| match frame {
            ClientFrame::Frame(data) => Incoming::Frame(data),
            ClientFrame::Pong => Incoming::Heartbeat,
        }))
    }
}

/// Client side of an in-memory pair.
pub struct MemoryClient {
    to_server: Option<mpsc::UnboundedSender<ClientFrame>>,
    from_server: mpsc::UnboundedReceiver<ServerFrame>,
    broken: Arc<AtomicBool>,
}

impl MemoryClient {
    /// Send a message to the server.
    ///
    /// Returns `false` if the client already disconnected or the server
    /// dropped its end.
    pub fn send(&self, message: &Message) -> bool {
        match codec::encode(message) {
            Ok(data) => self.send_raw(data),
            Err(_) => false,
        }
    }

    /// Send an arbitrary frame to the server.
    pub fn send_raw(&self, data: impl Into<Bytes>) -> bool {
        self.to_server
            .as_ref()
            .is_some_and(|tx| tx.send(ClientFrame::Frame(data.into())).is_ok())
    }

    /// Answer a keepalive probe.
    pub fn pong(&self) -> bool {
        self.to_server
            .as_ref()
            .is_some_and(|tx| tx.send(ClientFrame::Pong).is_ok())
    }

    /// Close the client side. The server sees a clean close.
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Make every subsequent server write fail.
    pub fn break_writes(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Receive the next raw server frame.
    pub async fn recv(&mut self) -> Option<ServerFrame> {
        self.from_server.recv().await
    }

    /// Receive the next decoded message, skipping pings.
    ///
    /// Returns `None` once the server closed or dropped the connection.
    pub async fn recv_message(&mut self) -> Option<Message> {
        loop {
            match self.from_server.recv().await? {
                ServerFrame::Frame(data) => return codec::decode(&data).ok(),
                ServerFrame::Ping => continue,
                ServerFrame::Close => return None,
            }
        }
    }

    /// Take an already-delivered message without waiting, skipping pings.
    pub fn try_recv_message(&mut self) -> Option<Message> {
        loop {
            match self.from_server.try_recv().ok()? {
                ServerFrame::Frame(data) => return codec::decode(&data).ok(),
                ServerFrame::Ping => continue,
                ServerFrame::Close => return None,
            }
        }
    }
}
