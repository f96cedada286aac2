// src/registry.rs
//! Connection Registry.
//!
//! The single owner of live connection state: each connection's subject, its
//! room memberships and the sending half of its outbound queue. All reads and
//! writes go through one `RwLock`; the lock is never held across an await on
//! the store or on a socket. The room membership index is not stored
//! separately: `connections_in` / `roster` project it from the table on every
//! call, so it cannot drift from the connections themselves.

use super::{
    error::SendError,
    types::{ConnectionId, RoomId, ServerFrame, SubjectId},
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, warn};

/// Serialized frames queued for one connection's writer task.
pub type OutboundTx = mpsc::Sender<Arc<str>>;
pub type OutboundRx = mpsc::Receiver<Arc<str>>;

struct ConnectionEntry {
    subject: SubjectId,
    rooms: HashSet<RoomId>,
    outbound: OutboundTx,
}

impl ConnectionEntry {
    // writer task gone means the socket is closing or closed
    fn is_writable(&self) -> bool {
        !self.outbound.is_closed()
    }
}

/// A snapshot of one writable connection, taken under the lock and used after it.
#[derive(Clone, Debug)]
pub struct Recipient {
    pub id: ConnectionId,
    pub subject: SubjectId,
    outbound: OutboundTx,
}

impl Recipient {
    pub fn send(&self, frame: Arc<str>) -> Result<(), SendError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an authenticated connection with no memberships.
    pub async fn open(&self, subject: SubjectId, outbound: OutboundTx) -> ConnectionId {
        let id = ConnectionId::new();
        let mut conns = self.connections.write().await;
        conns.insert(
            id,
            ConnectionEntry {
                subject,
                rooms: HashSet::new(),
                outbound,
            },
        );
        id
    }

    /// Removes the connection and hands back the rooms it was in.
    /// Closing an unknown or already-closed handle returns an empty set.
    pub async fn close(&self, id: ConnectionId) -> HashSet<RoomId> {
        let mut conns = self.connections.write().await;
        conns.remove(&id).map(|entry| entry.rooms).unwrap_or_default()
    }

    pub async fn is_open(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn joined_rooms(&self, id: ConnectionId) -> HashSet<RoomId> {
        let conns = self.connections.read().await;
        conns
            .get(&id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    /// Returns `true` only if membership actually changed.
    pub async fn add_room(&self, id: ConnectionId, room_id: &str) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get_mut(&id) {
            Some(entry) => entry.rooms.insert(room_id.to_string()),
            None => false,
        }
    }

    /// Returns `true` only if membership actually changed.
    pub async fn remove_room(&self, id: ConnectionId, room_id: &str) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get_mut(&id) {
            Some(entry) => entry.rooms.remove(room_id),
            None => false,
        }
    }

    /// Writable connections currently holding membership in `room_id`.
    pub async fn connections_in(&self, room_id: &str) -> Vec<Recipient> {
        let conns = self.connections.read().await;
        conns
            .iter()
            .filter(|(_, entry)| entry.rooms.contains(room_id) && entry.is_writable())
            .map(|(id, entry)| Recipient {
                id: *id,
                subject: entry.subject.clone(),
                outbound: entry.outbound.clone(),
            })
            .collect()
    }

    /// Distinct subjects of `connections_in(room_id)`.
    pub async fn roster(&self, room_id: &str) -> BTreeSet<SubjectId> {
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|entry| entry.rooms.contains(room_id) && entry.is_writable())
            .map(|entry| entry.subject.clone())
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of distinct rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        let conns = self.connections.read().await;
        conns
            .values()
            .flat_map(|entry| entry.rooms.iter())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Fans a frame out to every current member of `room_id`.
    /// A failing recipient is logged and skipped; the rest still get the frame.
    pub async fn send_to_room(&self, room_id: &str, frame: &ServerFrame) -> FanoutReport {
        let Some(payload) = encode(frame) else {
            return FanoutReport::default();
        };
        let mut report = FanoutReport::default();
        for recipient in self.connections_in(room_id).await {
            match recipient.send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        "⚠️ [FANOUT] Send to {} ({}) in room {} failed: {}",
                        recipient.id, recipient.subject, room_id, e
                    );
                }
            }
        }
        debug!(
            "[FANOUT] room={} delivered={} failed={}",
            room_id, report.delivered, report.failed
        );
        report
    }
}

pub fn encode(frame: &ServerFrame) -> Option<Arc<str>> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("❌ [ENCODE] Failed to serialize outbound frame: {}", e);
            None
        }
    }
}
