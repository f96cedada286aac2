// src/relay.rs
//! Message Relay: the per-connection protocol state machine.
//!
//! A connection only exists here once it is authenticated. Each inbound text
//! frame is decoded once into a [`ClientFrame`] and dispatched; the socket
//! loop awaits every dispatch before reading the next frame, which keeps a
//! connection's frames in arrival order.

use super::{
    presence::Presence,
    registry::{encode, ConnectionRegistry, OutboundTx},
    store::Store,
    types::{ClientFrame, ConnectionId, RoomId, ServerFrame, SubjectId},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const INVALID_JSON: &str = "Invalid JSON";
pub const SAVE_FAILED: &str = "Failed to save chat";

#[derive(Clone)]
pub struct Relay {
    registry: ConnectionRegistry,
    store: Arc<dyn Store>,
    presence: Presence,
}

/// One authenticated connection as seen by its own processing loop.
pub struct Session {
    pub id: ConnectionId,
    pub subject: SubjectId,
    reply: OutboundTx,
}

impl Session {
    /// Sender-only reply, never broadcast.
    pub fn reply(&self, frame: &ServerFrame) {
        let Some(payload) = encode(frame) else { return };
        if let Err(e) = self.reply.try_send(payload) {
            warn!("⚠️ [RELAY] Reply to {} ({}) dropped: {}", self.id, self.subject, e);
        }
    }
}

impl Relay {
    pub fn new(registry: ConnectionRegistry, store: Arc<dyn Store>) -> Self {
        let presence = Presence::new(registry.clone(), store.clone());
        Self {
            registry,
            store,
            presence,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Registers an authenticated connection. The returned guard owns its cleanup.
    pub async fn connect(
        &self,
        subject: SubjectId,
        outbound: OutboundTx,
    ) -> (Session, ConnectionGuard) {
        let id = self.registry.open(subject.clone(), outbound.clone()).await;
        info!("🔌 [RELAY] Connection {} opened for {}", id, subject);
        let session = Session {
            id,
            subject,
            reply: outbound,
        };
        let guard = ConnectionGuard {
            relay: self.clone(),
            id,
            released: false,
        };
        (session, guard)
    }

    /// Decodes one text frame and dispatches it. Never fatal to the connection.
    pub async fn handle_text(&self, session: &Session, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!("[RELAY] Undecodable frame from {}: {}", session.id, e);
                session.reply(&ServerFrame::error(INVALID_JSON));
                return;
            }
        };
        match serde_json::from_value::<ClientFrame>(value) {
            Ok(frame) => self.dispatch(session, frame).await,
            Err(e) => {
                debug!("[RELAY] Malformed command from {}: {}", session.id, e);
                session.reply(&ServerFrame::error(format!("Invalid message: {}", e)));
            }
        }
    }

    pub async fn dispatch(&self, session: &Session, frame: ClientFrame) {
        debug!("[RELAY] {} from {}", frame.kind(), session.id);
        match frame {
            ClientFrame::JoinRoom { room_id } => self.join_room(session, room_id).await,
            ClientFrame::LeaveRoom { room_id } => self.leave_room(session, room_id).await,
            ClientFrame::Chat { room_id, message } => self.chat(session, room_id, message).await,
            ClientFrame::Unknown => {
                debug!("[RELAY] Ignoring unknown command from {}", session.id);
            }
        }
    }

    async fn join_room(&self, session: &Session, room_id: RoomId) {
        if self.registry.add_room(session.id, &room_id).await {
            info!("🚪 [RELAY] {} joined room {}", session.subject, room_id);
            self.presence.broadcast_roster(&room_id).await;
        }
    }

    async fn leave_room(&self, session: &Session, room_id: RoomId) {
        if self.registry.remove_room(session.id, &room_id).await {
            info!("🚶 [RELAY] {} left room {}", session.subject, room_id);
            self.presence.broadcast_roster(&room_id).await;
        }
    }

    // Persist first. Nobody sees an event the store does not have.
    async fn chat(&self, session: &Session, room_id: RoomId, message: String) {
        if let Err(e) = self
            .store
            .append_event(&room_id, &session.subject, &message)
            .await
        {
            error!(
                "❌ [RELAY] Failed to persist chat from {} in room {}: {}",
                session.subject, room_id, e
            );
            session.reply(&ServerFrame::error(SAVE_FAILED));
            return;
        }

        let frame = ServerFrame::Chat {
            room_id: room_id.clone(),
            message,
            from: session.subject.clone(),
        };
        self.registry.send_to_room(&room_id, &frame).await;
    }

    /// Removes the connection and recomputes presence for every room it was in.
    /// Safe to call more than once; only the first call notifies anyone.
    pub async fn disconnect(&self, id: ConnectionId) -> usize {
        let rooms = self.registry.close(id).await;
        if !rooms.is_empty() {
            info!("👋 [RELAY] Connection {} closed, refreshing {} room(s)", id, rooms.len());
        }
        for room_id in &rooms {
            self.presence.broadcast_roster(room_id).await;
        }
        rooms.len()
    }
}

/// Scoped ownership of a registered connection.
///
/// `release` is the normal exit path. If the owning task unwinds or is
/// cancelled first, `Drop` schedules the same cleanup on the runtime.
pub struct ConnectionGuard {
    relay: Relay,
    id: ConnectionId,
    released: bool,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn release(mut self) -> usize {
        let rooms = self.relay.disconnect(self.id).await;
        self.released = true;
        rooms
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let relay = self.relay.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    relay.disconnect(id).await;
                });
            }
            Err(_) => warn!("⚠️ [RELAY] No runtime to release connection {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::registry::OutboundRx;
    use tokio::sync::mpsc;

    struct Harness {
        relay: Relay,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let relay = Relay::new(ConnectionRegistry::new(), store.clone());
            Self { relay, store }
        }

        async fn connect(&self, subject: &str) -> (Session, ConnectionGuard, OutboundRx) {
            let (tx, rx) = mpsc::channel(16);
            let (session, guard) = self.relay.connect(subject.into(), tx).await;
            (session, guard, rx)
        }
    }

    fn drain(rx: &mut OutboundRx) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            frames.push(serde_json::from_str(&raw).unwrap());
        }
        frames
    }

    fn roster_of(frame: &ServerFrame) -> Vec<String> {
        match frame {
            ServerFrame::UserList { users, .. } => {
                users.iter().map(|u| u.user_id.clone()).collect()
            }
            other => panic!("expected user_list, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_join_broadcasts_once() {
        let h = Harness::new();
        let (a, _ga, mut rx) = h.connect("u1").await;

        h.relay.handle_text(&a, r#"{"type":"join_room","roomId":"r1"}"#).await;
        h.relay.handle_text(&a, r#"{"type":"join_room","roomId":"r1"}"#).await;
        h.relay.handle_text(&a, r#"{"type":"leave_room","roomId":"r2"}"#).await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(roster_of(&frames[0]), vec!["u1"]);
    }

    #[tokio::test]
    async fn chat_is_persisted_then_broadcast_to_members_only() {
        let h = Harness::new();
        let (a, _ga, mut rx_a) = h.connect("u1").await;
        let (b, _gb, mut rx_b) = h.connect("u2").await;
        let (_c, _gc, mut rx_c) = h.connect("u3").await;
        h.relay.handle_text(&a, r#"{"type":"join_room","roomId":"r1"}"#).await;
        h.relay.handle_text(&b, r#"{"type":"join_room","roomId":"r1"}"#).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        h.relay
            .handle_text(&a, r#"{"type":"chat","roomId":"r1","message":"hello"}"#)
            .await;

        let expected = ServerFrame::Chat {
            room_id: "r1".into(),
            message: "hello".into(),
            from: "u1".into(),
        };
        assert_eq!(drain(&mut rx_a), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_b), vec![expected]);
        assert!(drain(&mut rx_c).is_empty());
        assert_eq!(h.store.event_count("r1"), 1);
    }

    #[tokio::test]
    async fn failed_persist_replies_to_sender_only() {
        let h = Harness::new();
        let (a, _ga, mut rx_a) = h.connect("u1").await;
        let (b, _gb, mut rx_b) = h.connect("u2").await;
        h.relay.handle_text(&a, r#"{"type":"join_room","roomId":"r1"}"#).await;
        h.relay.handle_text(&b, r#"{"type":"join_room","roomId":"r1"}"#).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        h.store.set_fail_appends(true);
        h.relay
            .handle_text(&a, r#"{"type":"chat","roomId":"r1","message":"lost"}"#)
            .await;

        assert_eq!(drain(&mut rx_a), vec![ServerFrame::error(SAVE_FAILED)]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn malformed_frames_get_an_error_and_processing_continues() {
        let h = Harness::new();
        let (a, _ga, mut rx) = h.connect("u1").await;

        h.relay.handle_text(&a, "{not json").await;
        h.relay.handle_text(&a, r#"{"type":"join_room"}"#).await;
        h.relay.handle_text(&a, r#"{"type":"draw_cursor","x":3}"#).await;
        h.relay.handle_text(&a, r#"{"type":"join_room","roomId":"r1"}"#).await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], ServerFrame::error(INVALID_JSON));
        assert!(matches!(
            &frames[1],
            ServerFrame::Error { message } if message.starts_with("Invalid message")
        ));
        assert_eq!(roster_of(&frames[2]), vec!["u1"]);
    }

    #[tokio::test]
    async fn release_updates_remaining_members_once() {
        let h = Harness::new();
        let (a, ga, _rx_a) = h.connect("u1").await;
        let (b, _gb, mut rx_b) = h.connect("u2").await;
        h.relay.handle_text(&a, r#"{"type":"join_room","roomId":"r1"}"#).await;
        h.relay.handle_text(&b, r#"{"type":"join_room","roomId":"r1"}"#).await;
        drain(&mut rx_b);

        let id = ga.id();
        assert_eq!(ga.release().await, 1);
        assert_eq!(h.relay.disconnect(id).await, 0);

        let frames = drain(&mut rx_b);
        assert_eq!(frames.len(), 1);
        assert_eq!(roster_of(&frames[0]), vec!["u2"]);
    }

    #[tokio::test]
    async fn dropped_guard_still_cleans_up() {
        let h = Harness::new();
        let (a, ga, _rx_a) = h.connect("u1").await;
        let (b, _gb, mut rx_b) = h.connect("u2").await;
        h.relay.handle_text(&a, r#"{"type":"join_room","roomId":"r1"}"#).await;
        h.relay.handle_text(&b, r#"{"type":"join_room","roomId":"r1"}"#).await;
        drain(&mut rx_b);

        drop(ga);

        let raw = tokio::time::timeout(std::time::Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        let frame: ServerFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(roster_of(&frame), vec!["u2"]);
        assert!(!h.relay.registry().is_open(a.id).await);
    }
}
