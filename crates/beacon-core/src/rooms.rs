//! Room registry for Beacon.
//!
//! The [`RoomManager`] owns every room and the reverse index from
//! connection to the rooms it belongs to. Rooms are created on first join
//! and deleted in the same critical section that removes their last
//! member, so an empty room is never visible to a later lookup.
//!
//! Lock order is always `rooms` then `memberships`; no operation takes a
//! guard on `rooms` while holding one on `memberships`.

use crate::broadcaster::{self, Delivery};
use crate::handle::ConnectionHandle;
use crate::identity::Identity;
use crate::metrics;
use crate::room::{validate_room_id, Member, Room, RoomId};
use beacon_protocol::{codec, Message, ProtocolError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tenvis_beacon_transport::ConnectionId;
use thiserror::Error;
use tracing::{debug, info};

/// Room manager errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// Invalid room id.
    #[error("Invalid room id: {0}")]
    InvalidRoomId(&'static str),

    /// Creating another room would exceed the configured limit.
    #[error("Maximum rooms reached")]
    MaxRoomsReached,
}

/// Room manager configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Maximum number of rooms. Joining an existing room is never refused.
    pub max_rooms: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self { max_rooms: 10_000 }
    }
}

/// Summary of a room at the time of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Room id.
    pub id: RoomId,
    /// Room instance epoch.
    pub epoch: u64,
    /// Number of members.
    pub member_count: usize,
}

/// Result of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    /// The joined room.
    pub room: RoomInfo,
    /// Identities in the room right after the join, sorted.
    pub members: Vec<Identity>,
    /// `false` if the connection was already a member.
    pub newly_joined: bool,
}

/// Room manager statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of connections in at least one room.
    pub connection_count: usize,
    /// Total number of memberships.
    pub total_memberships: usize,
}

struct Inner {
    /// Rooms indexed by id.
    rooms: DashMap<RoomId, Room>,
    /// Connection memberships (connection -> room ids).
    memberships: DashMap<ConnectionId, HashSet<RoomId>>,
    /// Source of room epochs.
    next_epoch: AtomicU64,
    /// Configuration.
    config: RoomConfig,
}

/// The room registry.
///
/// Cheap to clone; clones share state. Every instance is independent, so
/// tests can run many side by side.
#[derive(Clone)]
pub struct RoomManager {
    inner: Arc<Inner>,
}

/// Non-owning reference held by broadcaster tasks.
#[derive(Clone)]
pub(crate) struct WeakRoomManager(Weak<Inner>);

impl WeakRoomManager {
    pub(crate) fn upgrade(&self) -> Option<RoomManager> {
        self.0.upgrade().map(|inner| RoomManager { inner })
    }
}

impl RoomManager {
    /// Create a new room manager with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RoomConfig::default())
    }

    /// Create a new room manager with custom configuration.
    #[must_use]
    pub fn with_config(config: RoomConfig) -> Self {
        info!("Creating room manager with config: {:?}", config);
        Self {
            inner: Arc::new(Inner {
                rooms: DashMap::new(),
                memberships: DashMap::new(),
                next_epoch: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Get an existing room or create an empty one.
    ///
    /// A newly created room gets its own broadcaster task. An empty room
    /// created this way stays until a member joins and leaves it.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid or the room limit is
    /// reached.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime when the room does not
    /// exist yet.
    pub fn get_or_create(&self, room_id: &str) -> Result<RoomInfo, RoomError> {
        self.check_create(room_id)?;
        let room = self
            .inner
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| self.create_room(room_id));
        Ok(info_of(&room))
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// Joining a room the connection is already in changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid or the room limit is
    /// reached.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime when the room does not
    /// exist yet.
    pub fn join(
        &self,
        room_id: &str,
        handle: ConnectionHandle,
        identity: Identity,
    ) -> Result<Joined, RoomError> {
        self.check_create(room_id)?;
        let connection_id = handle.id();

        let mut room = self
            .inner
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| self.create_room(room_id));

        let newly_joined = room.insert(Member { identity, handle });
        if newly_joined {
            self.inner
                .memberships
                .entry(connection_id)
                .or_default()
                .insert(room_id.to_string());
        }

        Ok(Joined {
            room: info_of(&room),
            members: room.identities(),
            newly_joined,
        })
    }

    /// Remove a connection from every room it belongs to.
    ///
    /// Rooms left empty are deleted. Returns the number of rooms left.
    pub fn leave(&self, connection_id: ConnectionId) -> usize {
        let Some((_, room_ids)) = self.inner.memberships.remove(&connection_id) else {
            return 0;
        };

        let left = room_ids
            .iter()
            .filter(|room_id| self.remove_member(room_id, None, connection_id))
            .count();

        debug!(connection = %connection_id, rooms = left, "Left all rooms");
        left
    }

    /// Remove one member of one room instance after a failed delivery.
    ///
    /// Does nothing if `epoch` no longer names the live room.
    pub fn evict(&self, room_id: &str, epoch: u64, connection_id: ConnectionId) -> bool {
        let evicted = self.remove_member(room_id, Some(epoch), connection_id);
        if evicted {
            metrics::record_eviction();
            debug!(room = %room_id, connection = %connection_id, "Evicted member");
        }
        evicted
    }

    /// Remove a dead connection from every room.
    ///
    /// Used when a direct (non-room) delivery fails.
    pub fn evict_connection(&self, connection_id: ConnectionId) -> usize {
        let left = self.leave(connection_id);
        if left > 0 {
            metrics::record_eviction();
        }
        left
    }

    /// Encode `message` once and queue it for the room's broadcaster.
    ///
    /// Returns `Ok(false)` if the room does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn deliver(
        &self,
        room_id: &str,
        message: &Message,
        excluding: Option<ConnectionId>,
    ) -> Result<bool, ProtocolError> {
        let frame = codec::encode(message)?;
        Ok(self
            .inner
            .rooms
            .get(room_id)
            .is_some_and(|room| room.enqueue(Delivery { frame, excluding })))
    }

    /// Snapshot of a room's member identities, sorted.
    ///
    /// Empty if the room does not exist.
    #[must_use]
    pub fn members_of(&self, room_id: &str) -> Vec<Identity> {
        self.inner
            .rooms
            .get(room_id)
            .map(|room| room.identities())
            .unwrap_or_default()
    }

    /// Snapshot of every connection in any room, one entry per connection.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<Member> {
        self.collect_members(|_| true)
    }

    /// Every connection holding `identity`, one entry per connection.
    #[must_use]
    pub fn find_identity(&self, identity: &Identity) -> Vec<Member> {
        self.collect_members(|member| &member.identity == identity)
    }

    /// Check whether any live member holds `identity`.
    #[must_use]
    pub fn identity_in_use(&self, identity: &Identity) -> bool {
        self.inner
            .rooms
            .iter()
            .any(|room| room.members().any(|m| &m.identity == identity))
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.inner.rooms.contains_key(room_id)
    }

    /// Get the member count for a room.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.inner
            .rooms
            .get(room_id)
            .map(|room| room.member_count())
            .unwrap_or(0)
    }

    /// Get the rooms a connection belongs to.
    #[must_use]
    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        self.inner
            .memberships
            .get(&connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get room manager statistics.
    #[must_use]
    pub fn stats(&self) -> RoomStats {
        RoomStats {
            room_count: self.inner.rooms.len(),
            connection_count: self.inner.memberships.len(),
            total_memberships: self.inner.memberships.iter().map(|m| m.len()).sum(),
        }
    }

    /// Snapshot of one room instance's members for its broadcaster.
    ///
    /// `None` if the room was deleted or replaced by a newer instance.
    pub(crate) fn recipients(
        &self,
        room_id: &str,
        epoch: u64,
        excluding: Option<ConnectionId>,
    ) -> Option<Vec<Member>> {
        self.inner
            .rooms
            .get(room_id)
            .filter(|room| room.epoch() == epoch)
            .map(|room| room.recipients(excluding))
    }

    fn check_create(&self, room_id: &str) -> Result<(), RoomError> {
        validate_room_id(room_id).map_err(RoomError::InvalidRoomId)?;
        // Soft limit: concurrent creations may overshoot by a few
        if !self.inner.rooms.contains_key(room_id)
            && self.inner.rooms.len() >= self.inner.config.max_rooms
        {
            return Err(RoomError::MaxRoomsReached);
        }
        Ok(())
    }

    /// Build a room and start its broadcaster. Runs under the map entry.
    fn create_room(&self, room_id: &str) -> Room {
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let (room, queue) = Room::new(room_id, epoch);
        broadcaster::spawn(
            WeakRoomManager(Arc::downgrade(&self.inner)),
            room_id.to_string(),
            epoch,
            queue,
        );
        metrics::room_created();
        debug!(room = %room_id, epoch, "Created room");
        room
    }

    /// Remove a member; delete the room if that emptied it.
    ///
    /// The reverse index is updated under the same room guard, so a
    /// concurrent `join` of the same room sees either both changes or
    /// neither.
    fn remove_member(&self, room_id: &str, epoch: Option<u64>, connection_id: ConnectionId) -> bool {
        match self.inner.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if epoch.is_some_and(|epoch| entry.get().epoch() != epoch) {
                    return false;
                }
                let removed = entry.get_mut().remove(connection_id).is_some();
                if removed {
                    self.forget_membership(connection_id, room_id);
                }
                if entry.get().is_empty() {
                    entry.remove();
                    metrics::room_deleted();
                    debug!(room = %room_id, "Deleted empty room");
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Drop `room_id` from a connection's reverse index entry. Called with
    /// the room's entry guard held.
    fn forget_membership(&self, connection_id: ConnectionId, room_id: &str) {
        if let Entry::Occupied(mut rooms) = self.inner.memberships.entry(connection_id) {
            rooms.get_mut().remove(room_id);
            if rooms.get().is_empty() {
                rooms.remove();
            }
        }
    }

    fn collect_members(&self, mut keep: impl FnMut(&Member) -> bool) -> Vec<Member> {
        let mut unique: HashMap<ConnectionId, Member> = HashMap::new();
        for room in self.inner.rooms.iter() {
            for member in room.members() {
                if keep(member) {
                    unique
                        .entry(member.connection_id())
                        .or_insert_with(|| member.clone());
                }
            }
        }
        unique.into_values().collect()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

fn info_of(room: &Room) -> RoomInfo {
    RoomInfo {
        id: room.id().to_string(),
        epoch: room.epoch(),
        member_count: room.member_count(),
    }
}
