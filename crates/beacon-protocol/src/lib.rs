//! # beacon-protocol
//!
//! Wire message definitions for the Beacon signaling relay.
//!
//! Clients and the server exchange JSON objects tagged by `type`:
//!
//! - `init` - Request (and receive) a numeric client identity
//! - `join` - Enter a room and learn who is already there
//! - `global` / `room` - Broadcast to everyone or to one room
//! - `private` - Deliver to the holder of one identity
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, Message};
//!
//! let message = Message::room("r1", "hello");
//!
//! let encoded = codec::encode(&message).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(message, decoded);
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use message::{Message, MessageType, JOIN_SUCCESS};
