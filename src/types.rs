// src/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub type SubjectId = String;
pub type RoomId = String;

/// Opaque handle for one live connection. Owned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

// ==============================================================================
// 1. Inbound frames (client -> relay)
// ==============================================================================

// Tagged by `type`. Unknown tags decode to `Unknown` and are ignored by the relay.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "join_room")]
    JoinRoom {
        #[serde(rename = "roomId", deserialize_with = "room_id")]
        room_id: RoomId,
    },

    #[serde(rename = "leave_room")]
    LeaveRoom {
        #[serde(rename = "roomId", deserialize_with = "room_id")]
        room_id: RoomId,
    },

    #[serde(rename = "chat")]
    Chat {
        #[serde(rename = "roomId", deserialize_with = "room_id")]
        room_id: RoomId,
        message: String,
    },

    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::JoinRoom { .. } => "join_room",
            ClientFrame::LeaveRoom { .. } => "leave_room",
            ClientFrame::Chat { .. } => "chat",
            ClientFrame::Unknown => "unknown",
        }
    }
}

// Clients send room ids either as strings or as numeric primary keys.
fn room_id<'de, D>(deserializer: D) -> Result<RoomId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawRoomId {
        Text(String),
        Int(i64),
    }

    Ok(match RawRoomId::deserialize(deserializer)? {
        RawRoomId::Text(s) => s,
        RawRoomId::Int(n) => n.to_string(),
    })
}

// ==============================================================================
// 2. Outbound frames (relay -> client)
// ==============================================================================

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: SubjectId,
    pub display_name: String,
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Stand-in for a subject the store has no profile for.
    pub fn placeholder(subject: &str) -> Self {
        Self {
            user_id: subject.to_string(),
            display_name: subject.to_string(),
            avatar: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "chat")]
    Chat {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        message: String,
        from: SubjectId,
    },

    #[serde(rename = "user_list")]
    UserList {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        users: Vec<UserProfile>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

// ==============================================================================
// 3. Persisted events
// ==============================================================================

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: i64,
    pub room_id: RoomId,
    pub user_id: SubjectId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
