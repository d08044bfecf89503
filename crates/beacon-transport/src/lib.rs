//! # beacon-transport
//!
//! Transport abstraction layer for the Beacon signaling relay.
//!
//! The relay never performs handshakes itself: it is handed connections
//! that are already upgraded and only needs to read frames, write frames,
//! probe liveness and close.
//!
//! - **WebSocket** - Sockets upgraded by axum
//! - **Memory** - Channel-backed pairs for tests and embedding
//!
//! ```rust,ignore
//! use tenvis_beacon_transport::{Connection, FrameStream, Incoming};
//!
//! async fn read_all<C: Connection>(conn: C) {
//!     let (_sink, mut stream) = conn.split();
//!     while let Ok(Some(Incoming::Frame(data))) = stream.recv().await {
//!         // Decode and route
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, FrameSink, FrameStream, Incoming, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
