//! Message types for the Beacon protocol.
//!
//! Every frame exchanged with a client is a single JSON object tagged by
//! its `type` field. All other fields are optional and are omitted from
//! the encoded form when absent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content sent back to a client after a successful join.
pub const JOIN_SUCCESS: &str = "join room successful";

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Identity assignment request (client) or response (server).
    Init,
    /// Join a room.
    Join,
    /// Broadcast to every connected client.
    Global,
    /// Broadcast to the members of one room.
    Room,
    /// Unicast to the holder of an identity.
    Private,
}

impl MessageType {
    /// Get the wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Init => "init",
            MessageType::Join => "join",
            MessageType::Global => "global",
            MessageType::Room => "room",
            MessageType::Private => "private",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol message.
///
/// `type` is required. `roomId` is meaningful for `join` and `room`,
/// `clientId` for `private` (the target) and for the `init` response,
/// `clientIds` only for the `join` response. `content` is opaque to the
/// relay and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Target room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,

    /// Target (or assigned) client identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Identities present in a room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ids: Option<Vec<String>>,

    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

impl Message {
    /// Create an empty message of the given type.
    #[must_use]
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            room_id: None,
            client_id: None,
            client_ids: None,
            content: None,
        }
    }

    /// Create an `init` request carrying the identity seed.
    #[must_use]
    pub fn init(seed: impl Into<String>) -> Self {
        Self::new(MessageType::Init).with_content(serde_json::Value::String(seed.into()))
    }

    /// Create a `join` request.
    #[must_use]
    pub fn join(room_id: impl Into<String>) -> Self {
        Self::new(MessageType::Join).with_room(room_id)
    }

    /// Create a `global` broadcast.
    #[must_use]
    pub fn global(content: impl Into<serde_json::Value>) -> Self {
        Self::new(MessageType::Global).with_content(content)
    }

    /// Create a `room` broadcast.
    #[must_use]
    pub fn room(room_id: impl Into<String>, content: impl Into<serde_json::Value>) -> Self {
        Self::new(MessageType::Room)
            .with_room(room_id)
            .with_content(content)
    }

    /// Create a `private` message for the given identity.
    #[must_use]
    pub fn private(client_id: impl Into<String>, content: impl Into<serde_json::Value>) -> Self {
        Self::new(MessageType::Private)
            .with_client(client_id)
            .with_content(content)
    }

    /// Create the server's answer to `init`.
    #[must_use]
    pub fn init_response(client_id: impl Into<String>) -> Self {
        Self::new(MessageType::Init).with_client(client_id)
    }

    /// Create the server's answer to `join`.
    #[must_use]
    pub fn join_response(client_ids: Vec<String>) -> Self {
        let mut message = Self::new(MessageType::Join).with_content(JOIN_SUCCESS);
        message.client_ids = Some(client_ids);
        message
    }

    /// Set the room id.
    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    /// Set the client id.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<serde_json::Value>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// The content as a string, if it is one.
    #[must_use]
    pub fn content_str(&self) -> Option<&str> {
        self.content.as_ref().and_then(|c| c.as_str())
    }
}
