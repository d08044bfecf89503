//! Fan-out delivery.
//!
//! Each room has one broadcaster task consuming the room's queue, so a
//! recipient sees a room's messages in the order they were enqueued.
//! Writes are `try_send` into each member's outbound queue; a failed write
//! marks that member dead and evicts it without affecting the others.

use crate::handle::DeliveryError;
use crate::metrics;
use crate::room::{Member, RoomId};
use crate::rooms::WeakRoomManager;
use bytes::Bytes;
use tenvis_beacon_transport::ConnectionId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A pre-encoded message waiting for fan-out.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Encoded frame, shared by every recipient.
    pub frame: Bytes,
    /// Connection that must not receive the frame (the sender).
    pub excluding: Option<ConnectionId>,
}

/// Result of writing one frame to a set of members.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOut {
    /// Number of members the frame was queued for.
    pub delivered: usize,
    /// Members whose write failed. They have been told to close.
    pub failed: Vec<ConnectionId>,
}

/// Write `frame` to every member.
///
/// Failures are isolated per recipient: a dead member is closed and
/// reported in [`FanOut::failed`], and delivery continues with the rest.
pub fn fan_out(members: &[Member], frame: &Bytes) -> FanOut {
    let mut outcome = FanOut::default();

    for member in members {
        match member.handle.send_frame(frame.clone()) {
            Ok(()) => outcome.delivered += 1,
            Err(e) => {
                match e {
                    DeliveryError::QueueFull => warn!(
                        connection = %member.connection_id(),
                        identity = %member.identity,
                        "Recipient too slow, evicting"
                    ),
                    DeliveryError::Closed => debug!(
                        connection = %member.connection_id(),
                        identity = %member.identity,
                        "Recipient closed, evicting"
                    ),
                }
                member.handle.close();
                outcome.failed.push(member.connection_id());
            }
        }
    }

    metrics::record_deliveries(outcome.delivered);
    outcome
}

/// Start the broadcaster for one room instance.
///
/// The task ends when the room is deleted (its queue sender is dropped),
/// when the room id has been taken over by a newer instance, or when the
/// room manager itself is gone.
pub(crate) fn spawn(
    rooms: WeakRoomManager,
    room_id: RoomId,
    epoch: u64,
    mut queue: mpsc::UnboundedReceiver<Delivery>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(room = %room_id, epoch, "Broadcaster started");

        while let Some(delivery) = queue.recv().await {
            let Some(manager) = rooms.upgrade() else {
                break;
            };
            let Some(recipients) = manager.recipients(&room_id, epoch, delivery.excluding) else {
                break;
            };

            let outcome = fan_out(&recipients, &delivery.frame);
            trace!(room = %room_id, recipients = outcome.delivered, "Delivered");

            for connection_id in outcome.failed {
                manager.evict(&room_id, epoch, connection_id);
            }
        }

        debug!(room = %room_id, epoch, "Broadcaster stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ConnectionHandle, Outbound};
    use crate::identity::IdentityGenerator;

    fn member(seed: &str, capacity: usize) -> (Member, mpsc::Receiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::new(ConnectionId::next(), capacity);
        let identity = IdentityGenerator::default().generate(seed);
        (Member { identity, handle }, rx)
    }

    #[test]
    fn test_fan_out_isolates_failures() {
        let (a, mut a_rx) = member("a", 4);
        let (b, b_rx) = member("b", 4);
        let (c, mut c_rx) = member("c", 4);
        drop(b_rx);

        let frame = Bytes::from_static(b"{\"type\":\"global\"}");
        let outcome = fan_out(&[a, b.clone(), c], &frame);

        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.failed, vec![b.connection_id()]);
        assert_eq!(a_rx.try_recv().unwrap(), Outbound::Frame(frame.clone()));
        assert_eq!(c_rx.try_recv().unwrap(), Outbound::Frame(frame));
    }

    #[test]
    fn test_fan_out_slow_recipient_fails() {
        let (slow, _slow_rx) = member("slow", 1);
        slow.handle.send_frame(Bytes::from_static(b"backlog")).unwrap();

        let outcome = fan_out(&[slow.clone()], &Bytes::from_static(b"next"));
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.failed, vec![slow.connection_id()]);
    }
}
