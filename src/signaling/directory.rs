//! Presence directory: which peer is in which room, on which connection

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::warn;

use super::message::Envelope;

/// Identifier of one accepted signaling connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound side of one signaling connection
///
/// Sends never block; the connection task drains the bounded queue onto the
/// socket. A peer that stops reading fills its queue and is flagged as
/// overflowed, after which its connection task closes it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Envelope>,
    overflow: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            id,
            tx,
            overflow: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an envelope for delivery.
    ///
    /// Returns false if the connection is gone or its queue is full; a full
    /// queue drops the envelope and wakes [`ConnectionHandle::overflowed`].
    pub fn send(&self, envelope: Envelope) -> bool {
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                warn!(
                    "Outbound queue of {} is full, dropping {}",
                    self.id,
                    envelope.kind()
                );
                self.overflow.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Resolves once a send has been dropped because the queue was full
    pub async fn overflowed(&self) {
        self.overflow.notified().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A registered peer
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub room_id: String,
    pub connection: ConnectionHandle,
}

/// Mapping of peer id to (room, connection)
///
/// Rooms are not stored; they are derived by filtering records on room id.
#[derive(Debug, Default)]
pub struct PresenceDirectory {
    peers: BTreeMap<String, PeerRecord>,
    /// Last id registered on each connection
    bindings: HashMap<ConnectionId, String>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record (last writer wins). Returns the previous record.
    pub fn insert(
        &mut self,
        id: &str,
        room_id: &str,
        connection: ConnectionHandle,
    ) -> Option<PeerRecord> {
        self.bindings.insert(connection.id(), id.to_string());
        self.peers.insert(
            id.to_string(),
            PeerRecord {
                room_id: room_id.to_string(),
                connection,
            },
        )
    }

    pub fn remove(&mut self, id: &str) -> Option<PeerRecord> {
        self.peers.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// The id a connection currently speaks for, if its record is still live.
    ///
    /// A record overwritten by a later registration on another connection no
    /// longer belongs to this one.
    pub fn bound_id(&self, connection: ConnectionId) -> Option<&str> {
        let id = self.bindings.get(&connection)?;
        let record = self.peers.get(id)?;
        (record.connection.id() == connection).then_some(id.as_str())
    }

    /// Forget a connection and return the ids whose records it still owns
    pub fn unbind(&mut self, connection: ConnectionId) -> Vec<String> {
        self.bindings.remove(&connection);
        self.peers
            .iter()
            .filter(|(_, record)| record.connection.id() == connection)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Members of a room, in id order
    pub fn room_members<'a>(
        &'a self,
        room_id: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a PeerRecord)> + 'a {
        self.peers
            .iter()
            .filter(move |(_, record)| record.room_id == room_id)
            .map(|(id, record)| (id.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
