//! Message router
//!
//! Validates inbound envelopes, mutates the presence directory and delivers
//! the consequent membership notifications or relayed negotiation messages.
//! Each mutation and its broadcast happen under one lock, so membership
//! events are observed in the same order by every member of a room.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::directory::{ConnectionHandle, ConnectionId, PresenceDirectory};
use super::message::Envelope;

/// Envelopes queued per connection before it counts as too slow
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Routes envelopes between peers of the same room
pub struct Router {
    directory: Mutex<PresenceDirectory>,
    next_connection: AtomicU64,
    queue_capacity: usize,
}

impl Router {
    /// Create a router with an empty directory
    pub fn new() -> Self {
        Self::with_queue_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    /// Create a router whose connections queue at most `capacity` envelopes
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            directory: Mutex::new(PresenceDirectory::new()),
            next_connection: AtomicU64::new(1),
            queue_capacity: capacity.max(1),
        }
    }

    /// Allocate a handle for a newly accepted connection
    pub fn connect(&self) -> (ConnectionHandle, mpsc::Receiver<Envelope>) {
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        (ConnectionHandle::new(id, tx), rx)
    }

    /// Decode and dispatch one text frame. Malformed frames are dropped.
    pub fn handle_text(&self, connection: &ConnectionHandle, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) => self.dispatch(connection, envelope),
            Err(e) => warn!("Dropping frame from {}: {}", connection.id(), e),
        }
    }

    /// Dispatch a decoded envelope received on `connection`
    pub fn dispatch(&self, connection: &ConnectionHandle, envelope: Envelope) {
        match envelope {
            Envelope::Register { id, room_id } => self.register(&id, &room_id, connection),
            Envelope::Leave { id } => self.leave_from(connection.id(), &id),
            Envelope::Offer { .. } | Envelope::Answer { .. } | Envelope::Ice { .. } => {
                self.forward(connection.id(), envelope);
            }
            Envelope::UserList { .. }
            | Envelope::UserJoined { .. }
            | Envelope::UserLeft { .. }
            | Envelope::Unknown => {
                debug!(
                    "Ignoring {} envelope from {}",
                    envelope.kind(),
                    connection.id()
                );
            }
        }
    }

    /// Register `id` in `room_id` on `connection`.
    ///
    /// The registrant receives the other members of the room, then every other
    /// member is told about the registrant. When the id was already registered
    /// from another room or another connection, the members that knew the old
    /// registration first get `user-left`, so they drop their stale negotiation
    /// before `user-joined` starts a fresh one.
    pub fn register(&self, id: &str, room_id: &str, connection: &ConnectionHandle) {
        let mut directory = self.directory.lock();

        if let Some(previous) = directory.insert(id, room_id, connection.clone()) {
            let moved = previous.room_id != room_id;
            let replaced = previous.connection.id() != connection.id();
            if moved || replaced {
                if replaced {
                    info!(
                        "Peer {} re-registered from {} (was {})",
                        id,
                        connection.id(),
                        previous.connection.id()
                    );
                }
                broadcast(
                    &directory,
                    &previous.room_id,
                    Some(id),
                    Envelope::UserLeft { id: id.to_string() },
                );
            }
        }

        let users: Vec<String> = directory
            .room_members(room_id)
            .filter(|(member, _)| *member != id)
            .map(|(member, _)| member.to_string())
            .collect();

        info!(
            "Peer {} registered in room {} ({} other members)",
            id,
            room_id,
            users.len()
        );

        connection.send(Envelope::UserList { users });

        broadcast(
            &directory,
            room_id,
            Some(id),
            Envelope::UserJoined { id: id.to_string() },
        );
    }

    /// Remove `id` and tell the rest of its room. No-op if absent.
    pub fn leave(&self, id: &str) {
        let mut directory = self.directory.lock();
        remove_and_notify(&mut directory, id);
    }

    /// `leave` received on `connection`; only the connection that currently
    /// owns `id` may remove it.
    fn leave_from(&self, connection: ConnectionId, id: &str) {
        let mut directory = self.directory.lock();
        if let Some(record) = directory.get(id) {
            if record.connection.id() != connection {
                debug!("Ignoring leave for {} from non-owner {}", id, connection);
                return;
            }
        }
        remove_and_notify(&mut directory, id);
    }

    /// Relay a negotiation envelope from the peer bound to `from` to its target.
    ///
    /// Returns true if the envelope was delivered. Unknown targets, unregistered
    /// senders and cross-room targets are dropped silently.
    pub fn forward(&self, from: ConnectionId, envelope: Envelope) -> bool {
        let directory = self.directory.lock();

        let Some(target_id) = envelope.target() else {
            return false;
        };
        let Some(sender_id) = directory.bound_id(from) else {
            debug!("Dropping {} from unregistered {}", envelope.kind(), from);
            return false;
        };
        let Some(target) = directory.get(target_id) else {
            debug!(
                "Dropping {} from {} to unknown peer {}",
                envelope.kind(),
                sender_id,
                target_id
            );
            return false;
        };
        let sender_room = directory
            .get(sender_id)
            .map(|record| record.room_id.as_str());
        if sender_room != Some(target.room_id.as_str()) {
            debug!(
                "Dropping cross-room {} from {} to {}",
                envelope.kind(),
                sender_id,
                target_id
            );
            return false;
        }

        debug!("Relaying {} {} -> {}", envelope.kind(), sender_id, target_id);
        target.connection.send(envelope.with_sender(sender_id))
    }

    /// Treat a closed transport as `leave` for every id it still owns
    pub fn disconnect(&self, connection: ConnectionId) {
        let mut directory = self.directory.lock();
        for id in directory.unbind(connection) {
            info!("Connection {} closed, removing peer {}", connection, id);
            remove_and_notify(&mut directory, &id);
        }
    }

    /// Ids registered in a room, in id order
    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        self.directory
            .lock()
            .room_members(room_id)
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Number of registered peers across all rooms
    pub fn peer_count(&self) -> usize {
        self.directory.lock().len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_and_notify(directory: &mut PresenceDirectory, id: &str) {
    let Some(record) = directory.remove(id) else {
        return;
    };
    info!("Peer {} left room {}", id, record.room_id);
    broadcast(
        directory,
        &record.room_id,
        Some(id),
        Envelope::UserLeft { id: id.to_string() },
    );
}

fn broadcast(
    directory: &PresenceDirectory,
    room_id: &str,
    except: Option<&str>,
    envelope: Envelope,
) {
    for (member, record) in directory.room_members(room_id) {
        if Some(member) == except {
            continue;
        }
        if !record.connection.send(envelope.clone()) {
            debug!("Peer {} connection already closed", member);
        }
    }
}
