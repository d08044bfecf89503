//! Room abstraction for Beacon.
//!
//! Rooms are named groups of identified connections. A room owns the
//! sending side of its broadcaster's queue; dropping the room stops the
//! broadcaster.

use crate::broadcaster::Delivery;
use crate::handle::ConnectionHandle;
use crate::identity::Identity;
use std::collections::HashMap;
use tenvis_beacon_transport::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Maximum room id length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// A room identifier.
pub type RoomId = String;

/// Validate a room id.
///
/// # Errors
///
/// Returns an error message if the room id is invalid.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

/// A room member.
#[derive(Debug, Clone)]
pub struct Member {
    /// The member's identity.
    pub identity: Identity,
    /// Handle for writing to the member.
    pub handle: ConnectionHandle,
}

impl Member {
    /// Get the member's connection ID.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }
}

/// A room.
#[derive(Debug)]
pub struct Room {
    /// Room id.
    id: RoomId,
    /// Distinguishes this instance from earlier rooms with the same id.
    epoch: u64,
    /// Members keyed by connection.
    members: HashMap<ConnectionId, Member>,
    /// Broadcaster queue.
    queue: mpsc::UnboundedSender<Delivery>,
}

impl Room {
    /// Create an empty room and the queue its broadcaster consumes.
    pub(crate) fn new(
        id: impl Into<RoomId>,
        epoch: u64,
    ) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let room = Self {
            id: id.into(),
            epoch,
            members: HashMap::new(),
            queue,
        };
        (room, rx)
    }

    /// Get the room id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the room epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.members.contains_key(&connection_id)
    }

    /// Add a member.
    ///
    /// Returns `false` if the connection was already a member; the existing
    /// membership is kept.
    pub fn insert(&mut self, member: Member) -> bool {
        let connection_id = member.connection_id();
        if self.members.contains_key(&connection_id) {
            return false;
        }
        debug!(room = %self.id, connection = %connection_id, identity = %member.identity, "Member joined");
        self.members.insert(connection_id, member);
        true
    }

    /// Remove a member.
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Member> {
        let member = self.members.remove(&connection_id);
        if member.is_some() {
            debug!(room = %self.id, connection = %connection_id, "Member left");
        }
        member
    }

    /// Snapshot of member identities, sorted.
    #[must_use]
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> =
            self.members.values().map(|m| m.identity.clone()).collect();
        identities.sort();
        identities
    }

    /// Iterate over members.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Snapshot of members, optionally leaving one connection out.
    #[must_use]
    pub fn recipients(&self, excluding: Option<ConnectionId>) -> Vec<Member> {
        self.members
            .values()
            .filter(|m| Some(m.connection_id()) != excluding)
            .cloned()
            .collect()
    }

    /// Hand a delivery to the broadcaster.
    ///
    /// Never blocks. Returns `false` if the broadcaster is gone.
    pub(crate) fn enqueue(&self, delivery: Delivery) -> bool {
        trace!(room = %self.id, "Enqueueing delivery");
        self.queue.send(delivery).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityGenerator;

    fn member(seed: &str) -> (Member, mpsc::Receiver<crate::handle::Outbound>) {
        let (handle, rx) = ConnectionHandle::new(ConnectionId::next(), 8);
        let identity = IdentityGenerator::default().generate(seed);
        (Member { identity, handle }, rx)
    }

    #[test]
    fn test_room_creation() {
        let (room, _rx) = Room::new("r1", 7);
        assert_eq!(room.id(), "r1");
        assert_eq!(room.epoch(), 7);
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_insert_is_idempotent() {
        let (mut room, _rx) = Room::new("r1", 1);
        let (a, _a_rx) = member("a");

        assert!(room.insert(a.clone()));
        assert!(!room.insert(a.clone()));
        assert_eq!(room.member_count(), 1);
        assert!(room.contains(a.connection_id()));

        assert!(room.remove(a.connection_id()).is_some());
        assert!(room.remove(a.connection_id()).is_none());
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_recipients_excluding() {
        let (mut room, _rx) = Room::new("r1", 1);
        let (a, _a_rx) = member("a");
        let (b, _b_rx) = member("b");
        room.insert(a.clone());
        room.insert(b.clone());

        let recipients = room.recipients(Some(a.connection_id()));
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].connection_id(), b.connection_id());
        assert_eq!(room.recipients(None).len(), 2);

        let mut expected = vec![a.identity, b.identity];
        expected.sort();
        assert_eq!(room.identities(), expected);
    }

    #[test]
    fn test_room_id_validation() {
        assert!(validate_room_id("r1").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("bad\nid").is_err());
        assert!(validate_room_id(&"a".repeat(MAX_ROOM_ID_LENGTH + 1)).is_err());
    }
}
