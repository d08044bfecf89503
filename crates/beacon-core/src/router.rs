//! Message routing for Beacon.
//!
//! The router turns one inbound [`Message`] into deliveries. It never
//! performs network I/O: replies and fan-out only enqueue onto connection
//! or room queues, so no write ever happens under a room lock.

use crate::broadcaster::fan_out;
use crate::handle::{ConnectionHandle, DeliveryError};
use crate::identity::{Identity, IdentityGenerator};
use crate::metrics;
use crate::room::{Member, RoomId};
use crate::rooms::{RoomConfig, RoomError, RoomManager};
use beacon_protocol::{codec, Message, MessageType, ProtocolError};
use tenvis_beacon_transport::ConnectionId;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Room every identified connection is placed in.
pub const DEFAULT_ROOM: &str = "lobby";

/// Routing errors.
///
/// None of these end the session. Malformed input is worth a warning;
/// routing misses are expected and only logged at debug level.
#[derive(Debug, Error)]
pub enum RouteError {
    /// `init` without a string seed.
    #[error("Init requires a non-empty string seed in content")]
    MissingSeed,

    /// `join` or `room` without `roomId`.
    #[error("Room id is required")]
    MissingRoomId,

    /// `private` without `clientId`.
    #[error("Client id is required")]
    MissingClientId,

    /// The session has no identity yet.
    #[error("Connection has not sent init")]
    NotIdentified,

    /// Room could not be joined.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// No room with this id.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// No connection holds this identity.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Reply to the sender could not be queued.
    #[error("Reply failed: {0}")]
    Reply(#[from] DeliveryError),
}

impl RouteError {
    /// Whether this is a routing miss rather than bad input.
    #[must_use]
    pub fn is_routing_miss(&self) -> bool {
        matches!(self, RouteError::RoomNotFound(_) | RouteError::TargetNotFound(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            RouteError::MissingSeed => "missing_seed",
            RouteError::MissingRoomId => "missing_room_id",
            RouteError::MissingClientId => "missing_client_id",
            RouteError::NotIdentified => "not_identified",
            RouteError::Room(RoomError::InvalidRoomId(_)) => "invalid_room_id",
            RouteError::Room(RoomError::MaxRoomsReached) => "max_rooms",
            RouteError::RoomNotFound(_) => "room_not_found",
            RouteError::TargetNotFound(_) => "target_not_found",
            RouteError::Protocol(_) => "protocol",
            RouteError::Reply(_) => "reply",
        }
    }
}

/// What a successfully routed message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The session holds this identity.
    Identified(Identity),
    /// The session is in `room`, which now has `members` members.
    Joined {
        /// Room id.
        room: RoomId,
        /// Member count after the join.
        members: usize,
    },
    /// Queued for the room's broadcaster.
    Enqueued {
        /// Room id.
        room: RoomId,
    },
    /// Written directly to `recipients` connections.
    Delivered {
        /// Number of connections the frame was queued for.
        recipients: usize,
    },
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Room joined on `init`.
    pub default_room: String,
    /// Identity generator.
    pub identities: IdentityGenerator,
    /// Room manager configuration.
    pub rooms: RoomConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_room: DEFAULT_ROOM.to_string(),
            identities: IdentityGenerator::default(),
            rooms: RoomConfig::default(),
        }
    }
}

/// Per-connection routing state.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    identity: Option<Identity>,
}

impl Session {
    /// Create a session for a connection.
    #[must_use]
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            identity: None,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Get the identity, once assigned.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Get the connection handle.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    fn reply(&self, message: &Message) -> Result<(), RouteError> {
        let frame = codec::encode(message)?;
        self.handle.send_frame(frame)?;
        Ok(())
    }
}

/// The message router.
pub struct MessageRouter {
    rooms: RoomManager,
    config: RouterConfig,
}

impl MessageRouter {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!(
            default_room = %config.default_room,
            identity_digits = config.identities.digits(),
            "Creating message router"
        );
        Self {
            rooms: RoomManager::with_config(config.rooms.clone()),
            config,
        }
    }

    /// Get the room manager.
    #[must_use]
    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    /// Route one inbound message from `session`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is malformed for its type, if its
    /// target does not exist, or if the reply to the sender cannot be
    /// queued. The session stays usable in every case.
    pub fn route(&self, session: &mut Session, message: Message) -> Result<Routed, RouteError> {
        metrics::record_message(message.kind.as_str());

        let result = match message.kind {
            MessageType::Init => self.init(session, &message),
            MessageType::Join => self.join(session, &message),
            MessageType::Global => self.global(session, &message),
            MessageType::Room => self.room(session, &message),
            MessageType::Private => self.private(&message),
        };

        if let Err(e) = &result {
            metrics::record_error(e.kind());
        }
        result
    }

    fn init(&self, session: &mut Session, message: &Message) -> Result<Routed, RouteError> {
        if let Some(identity) = session.identity() {
            debug!(connection = %session.id(), identity = %identity, "Repeated init, keeping identity");
            session.reply(&Message::init_response(identity.as_str()))?;
            return Ok(Routed::Identified(identity.clone()));
        }

        let seed = message
            .content_str()
            .filter(|seed| !seed.is_empty())
            .ok_or(RouteError::MissingSeed)?;
        let identity = self.config.identities.generate(seed);

        if self.rooms.identity_in_use(&identity) {
            warn!(
                connection = %session.id(),
                identity = %identity,
                "Identity collision: another live connection holds this identity"
            );
        }

        self.rooms.join(
            &self.config.default_room,
            session.handle().clone(),
            identity.clone(),
        )?;
        session.identity = Some(identity.clone());
        debug!(connection = %session.id(), identity = %identity, "Assigned identity");

        session.reply(&Message::init_response(identity.as_str()))?;
        Ok(Routed::Identified(identity))
    }

    fn join(&self, session: &Session, message: &Message) -> Result<Routed, RouteError> {
        let identity = session.identity().cloned().ok_or(RouteError::NotIdentified)?;
        let room_id = message.room_id.as_deref().ok_or(RouteError::MissingRoomId)?;

        let joined = self.rooms.join(room_id, session.handle().clone(), identity)?;
        debug!(
            connection = %session.id(),
            room = %room_id,
            members = joined.room.member_count,
            "Joined room"
        );

        let client_ids = joined.members.into_iter().map(Identity::into_string).collect();
        session.reply(&Message::join_response(client_ids))?;

        Ok(Routed::Joined {
            room: joined.room.id,
            members: joined.room.member_count,
        })
    }

    fn global(&self, session: &Session, message: &Message) -> Result<Routed, RouteError> {
        let sender = session.id();
        let recipients: Vec<Member> = self
            .rooms
            .snapshot_all()
            .into_iter()
            .filter(|m| m.connection_id() != sender)
            .collect();

        let delivered = self.deliver_direct(&recipients, message)?;
        debug!(connection = %sender, recipients = delivered, "Global broadcast");
        Ok(Routed::Delivered {
            recipients: delivered,
        })
    }

    fn room(&self, session: &Session, message: &Message) -> Result<Routed, RouteError> {
        let room_id = message.room_id.as_deref().ok_or(RouteError::MissingRoomId)?;

        if self.rooms.deliver(room_id, message, Some(session.id()))? {
            Ok(Routed::Enqueued {
                room: room_id.to_string(),
            })
        } else {
            Err(RouteError::RoomNotFound(room_id.to_string()))
        }
    }

    fn private(&self, message: &Message) -> Result<Routed, RouteError> {
        let target = message.client_id.as_deref().ok_or(RouteError::MissingClientId)?;

        // Nothing can hold a malformed identity, so skip the scan
        let recipients = Identity::parse(target)
            .map(|identity| self.rooms.find_identity(&identity))
            .unwrap_or_default();
        if recipients.is_empty() {
            return Err(RouteError::TargetNotFound(target.to_string()));
        }
        if recipients.len() > 1 {
            debug!(identity = %target, connections = recipients.len(), "Identity held by several connections");
        }

        let delivered = self.deliver_direct(&recipients, message)?;
        Ok(Routed::Delivered {
            recipients: delivered,
        })
    }

    /// Encode once and write to each recipient, evicting the dead ones.
    fn deliver_direct(&self, recipients: &[Member], message: &Message) -> Result<usize, RouteError> {
        let frame = codec::encode(message)?;
        let outcome = fan_out(recipients, &frame);
        for connection_id in outcome.failed {
            self.rooms.evict_connection(connection_id);
        }
        Ok(outcome.delivered)
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}
