// src/presence.rs
//! Presence Broadcaster: recomputes a room's roster from the live registry
//! and pushes it to everyone in the room.
//!
//! A roster is never cached. Two quick membership changes each trigger a full
//! recomputation; whichever broadcast lands last at a client is what it shows.

use super::{
    registry::{ConnectionRegistry, FanoutReport},
    store::Store,
    types::{ServerFrame, UserProfile},
};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Presence {
    registry: ConnectionRegistry,
    store: Arc<dyn Store>,
}

impl Presence {
    pub fn new(registry: ConnectionRegistry, store: Arc<dyn Store>) -> Self {
        Self { registry, store }
    }

    /// Returns `None` when nothing was sent: the room is empty or the profile
    /// lookup failed (the next membership change retries naturally).
    pub async fn broadcast_roster(&self, room_id: &str) -> Option<FanoutReport> {
        let subjects = self.registry.roster(room_id).await;
        if subjects.is_empty() {
            debug!("[PRESENCE] Room {} is empty, nothing to broadcast", room_id);
            return None;
        }

        let mut profiles = match self.store.resolve_profiles(&subjects).await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(
                    "⚠️ [PRESENCE] Profile lookup for room {} failed, skipping broadcast: {}",
                    room_id, e
                );
                return None;
            }
        };

        let users: Vec<UserProfile> = subjects
            .iter()
            .map(|s| profiles.remove(s).unwrap_or_else(|| UserProfile::placeholder(s)))
            .collect();

        let frame = ServerFrame::UserList {
            room_id: room_id.to_string(),
            users,
        };
        Some(self.registry.send_to_room(room_id, &frame).await)
    }
}
