// src/sqlite_store.rs

use super::{
    error::StoreError,
    store::Store,
    types::{StoredEvent, SubjectId, UserProfile},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
        SqliteSynchronous,
    },
    QueryBuilder, Row, Sqlite,
};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use tracing::info;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(&database_url.replace("sqlite:", "")).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("cannot create {:?}: {}", parent, e))
                })?;
            }
        }

        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("busy_timeout", "5000");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY NOT NULL,
                display_name TEXT NOT NULL,
                avatar TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_room ON chats (room_id, id)")
            .execute(&self.pool)
            .await?;

        info!("🗃️ [STORE] 'users' and 'chats' tables are ready.");
        Ok(())
    }

    /// Profiles belong to the account service; this is for seeding and local dev.
    pub async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, display_name, avatar) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE
             SET display_name = excluded.display_name, avatar = excluded.avatar",
        )
        .bind(&profile.user_id)
        .bind(&profile.display_name)
        .bind(&profile.avatar)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn append_event(
        &self,
        room_id: &str,
        author: &str,
        payload: &str,
    ) -> Result<StoredEvent, StoreError> {
        // stored as epoch millis, so hand back exactly what a later read will see
        let millis = Utc::now().timestamp_millis();
        let created_at = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default();
        let id = sqlx::query(
            "INSERT INTO chats (room_id, user_id, message, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(room_id)
        .bind(author)
        .bind(payload)
        .bind(millis)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(StoredEvent {
            id,
            room_id: room_id.to_string(),
            user_id: author.to_string(),
            message: payload.to_string(),
            created_at,
        })
    }

    async fn recent_events(
        &self,
        room_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let events = sqlx::query_as::<_, StoredEvent>(
            "SELECT id, room_id, user_id, message, created_at FROM chats
             WHERE room_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(room_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn resolve_profiles(
        &self,
        subjects: &BTreeSet<SubjectId>,
    ) -> Result<HashMap<SubjectId, UserProfile>, StoreError> {
        if subjects.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT id, display_name, avatar FROM users WHERE id IN (");
        let mut ids = query.separated(", ");
        for subject in subjects {
            ids.push_bind(subject);
        }
        ids.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut profiles = HashMap::with_capacity(rows.len());
        for row in rows {
            let profile = UserProfile {
                user_id: row.try_get("id")?,
                display_name: row.try_get("display_name")?,
                avatar: row.try_get("avatar")?,
            };
            profiles.insert(profile.user_id.clone(), profile);
        }
        Ok(profiles)
    }
}

impl sqlx::FromRow<'_, SqliteRow> for StoredEvent {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let millis: i64 = row.try_get("created_at")?;
        Ok(StoredEvent {
            id: row.try_get("id")?,
            room_id: row.try_get("room_id")?,
            user_id: row.try_get("user_id")?,
            message: row.try_get("message")?,
            created_at: DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        // one connection: every pooled connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::from_pool(pool);
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn appended_events_come_back_newest_first() {
        let store = memory_store().await;
        let first = store.append_event("r1", "u1", "a").await.unwrap();
        let second = store.append_event("r1", "u2", "b").await.unwrap();
        store.append_event("r2", "u1", "c").await.unwrap();
        assert!(second.id > first.id);

        let events = store.recent_events("r1", 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], second);
        assert_eq!(events[1], first);

        let bounded = store.recent_events("r1", 1).await.unwrap();
        assert_eq!(bounded.len(), 1);
    }

    #[tokio::test]
    async fn profiles_resolve_in_one_batch() {
        let store = memory_store().await;
        for (id, name) in [("u1", "Ada"), ("u2", "Grace"), ("u3", "Linus")] {
            store
                .upsert_profile(&UserProfile {
                    user_id: id.into(),
                    display_name: name.into(),
                    avatar: None,
                })
                .await
                .unwrap();
        }

        let subjects = BTreeSet::from(["u1".to_string(), "u3".to_string(), "ghost".to_string()]);
        let profiles = store.resolve_profiles(&subjects).await.unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles["u3"].display_name, "Linus");
        assert!(store.resolve_profiles(&BTreeSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_profile() {
        let store = memory_store().await;
        let mut profile = UserProfile {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            avatar: None,
        };
        store.upsert_profile(&profile).await.unwrap();
        profile.avatar = Some("https://img/ada.png".into());
        store.upsert_profile(&profile).await.unwrap();

        let profiles = store
            .resolve_profiles(&BTreeSet::from(["u1".to_string()]))
            .await
            .unwrap();
        assert_eq!(profiles["u1"], profile);
    }
}
