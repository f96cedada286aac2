// src/store.rs
use super::{
    error::StoreError,
    types::{StoredEvent, SubjectId, UserProfile},
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

/// Durable side of the relay: chat/drawing events and user profiles.
///
/// Every call may be slow or fail. Callers await it from a single connection's
/// task, never while holding registry state.
#[async_trait]
pub trait Store: Send + Sync {
    /// Appends an event. Must have completed before the event is broadcast.
    async fn append_event(
        &self,
        room_id: &str,
        author: &str,
        payload: &str,
    ) -> Result<StoredEvent, StoreError>;

    /// Most recent events of a room, newest first, at most `limit` of them.
    async fn recent_events(
        &self,
        room_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Resolves a whole roster in one round trip. Unknown subjects are simply absent.
    async fn resolve_profiles(
        &self,
        subjects: &BTreeSet<SubjectId>,
    ) -> Result<HashMap<SubjectId, UserProfile>, StoreError>;
}
