// src/memory_store.rs
use super::{
    error::StoreError,
    store::Store,
    types::{StoredEvent, SubjectId, UserProfile},
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// In-process store for `DATABASE_URL=memory` and for tests.
/// Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    events: DashMap<String, Vec<StoredEvent>>,
    profiles: DashMap<SubjectId, UserProfile>,
    next_id: AtomicI64,
    fail_appends: AtomicBool,
    fail_profiles: AtomicBool,
    append_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_profile(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_profiles(&self, fail: bool) {
        self.fail_profiles.store(fail, Ordering::SeqCst);
    }

    pub fn set_append_delay(&self, delay: Duration) {
        self.append_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn event_count(&self, room_id: &str) -> usize {
        self.events.get(room_id).map_or(0, |events| events.len())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_event(
        &self,
        room_id: &str,
        author: &str,
        payload: &str,
    ) -> Result<StoredEvent, StoreError> {
        let delay = self.append_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("append rejected".into()));
        }

        let event = StoredEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            room_id: room_id.to_string(),
            user_id: author.to_string(),
            message: payload.to_string(),
            created_at: Utc::now(),
        };
        self.events
            .entry(room_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(event)
    }

    async fn recent_events(
        &self,
        room_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self
            .events
            .get(room_id)
            .map(|events| {
                events
                    .iter()
                    .rev()
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn resolve_profiles(
        &self,
        subjects: &BTreeSet<SubjectId>,
    ) -> Result<HashMap<SubjectId, UserProfile>, StoreError> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("profile lookup rejected".into()));
        }
        Ok(subjects
            .iter()
            .filter_map(|s| self.profiles.get(s).map(|p| (s.clone(), p.value().clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recent_events_are_newest_first_and_bounded() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.append_event("r1", "u1", &format!("m{i}")).await.unwrap();
        }
        store.append_event("r2", "u1", "other").await.unwrap();

        let recent = store.recent_events("r1", 3).await.unwrap();
        let messages: Vec<_> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["m4", "m3", "m2"]);
        assert!(store.recent_events("missing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_append_records_nothing() {
        let store = MemoryStore::new();
        store.set_fail_appends(true);
        assert!(store.append_event("r1", "u1", "x").await.is_err());
        assert_eq!(store.event_count("r1"), 0);
    }

    #[tokio::test]
    async fn resolve_profiles_skips_unknown_subjects() {
        let store = MemoryStore::new();
        store.upsert_profile(UserProfile {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            avatar: Some("https://img/ada.png".into()),
        });
        let subjects = BTreeSet::from(["u1".to_string(), "ghost".to_string()]);
        let profiles = store.resolve_profiles(&subjects).await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles["u1"].display_name, "Ada");
    }
}
