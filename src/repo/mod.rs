//! Repository collaborator seams.
//!
//! Persistent storage of users, friendships, rooms and messages is somebody
//! else's problem; this core only talks to it through these traits. The
//! in-memory implementations in [`memory`] back the default binary and the
//! test suite.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DomainError;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub online: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub id: i64,
    pub creator_id: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    pub members_id: Vec<i64>,
    pub private: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub creator_id: i64,
    pub room_id: i64,
    pub msg_type: i64,
    pub msg_body: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Search filter for user lookups. All present fields must match.
#[derive(Debug, Clone, Default)]
pub struct UserSearchSpec {
    pub email_like: Option<String>,
    pub id_list: Option<Vec<i64>>,
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Resolve a session token to its user. `Unauthorized` if the token is
    /// unknown; used at connection accept time.
    async fn user_by_token(&self, token: &str) -> Result<User, DomainError>;

    async fn get_users(&self, spec: &UserSearchSpec) -> Result<Vec<User>, DomainError>;

    /// Persist the online flag (and bump last activity).
    async fn set_online(&self, user_id: i64, online: bool) -> Result<(), DomainError>;
}

#[async_trait]
pub trait FriendRepo: Send + Sync {
    async fn friends_of(&self, user_id: i64) -> Result<Vec<i64>, DomainError>;

    async fn create_friendship(&self, user_id: i64, friend_id: i64) -> Result<(), DomainError>;

    async fn incoming_request_ids(&self, user_id: i64) -> Result<Vec<i64>, DomainError>;

    async fn outgoing_request_ids(&self, user_id: i64) -> Result<Vec<i64>, DomainError>;
}

#[async_trait]
pub trait RoomRepo: Send + Sync {
    async fn create_room(
        &self,
        creator_id: i64,
        members_id: Vec<i64>,
        private: bool,
    ) -> Result<i64, DomainError>;

    async fn rooms_of(&self, member_id: i64) -> Result<Vec<Room>, DomainError>;

    /// `NotFound` if no such room.
    async fn room_by_id(&self, room_id: i64) -> Result<Room, DomainError>;

    async fn create_message(
        &self,
        creator_id: i64,
        room_id: i64,
        msg_type: i64,
        msg_body: String,
    ) -> Result<ChatMessage, DomainError>;

    async fn messages_in(&self, room_id: i64) -> Result<Vec<ChatMessage>, DomainError>;
}
