//! In-memory repository implementations.
//!
//! DashMap-backed stores with atomic id counters. These carry the default
//! binary and the integration tests; swapping in database-backed
//! implementations means implementing the traits in `repo`, nothing else.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

use crate::error::DomainError;
use crate::repo::{ChatMessage, FriendRepo, Room, RoomRepo, User, UserRepo, UserSearchSpec};

#[derive(Default)]
pub struct MemoryUserRepo {
    users: DashMap<i64, User>,
    tokens: DashMap<String, i64>,
    next_id: AtomicI64,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn add_user(&self, email: &str) -> User {
        let user = User {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            email: email.to_string(),
            online: false,
            last_activity: Utc::now(),
        };
        self.users.insert(user.id, user.clone());
        user
    }

    /// Mint a session token for the user, as the (out-of-scope) login flow
    /// would.
    pub fn issue_token(&self, user_id: i64) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens.insert(token.clone(), user_id);
        token
    }

    pub fn user(&self, user_id: i64) -> Option<User> {
        self.users.get(&user_id).map(|u| u.value().clone())
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn user_by_token(&self, token: &str) -> Result<User, DomainError> {
        let user_id = *self.tokens.get(token).ok_or(DomainError::Unauthorized)?;
        self.users
            .get(&user_id)
            .map(|u| u.value().clone())
            .ok_or(DomainError::Unauthorized)
    }

    async fn get_users(&self, spec: &UserSearchSpec) -> Result<Vec<User>, DomainError> {
        let mut found: Vec<User> = self
            .users
            .iter()
            .filter(|entry| {
                let user = entry.value();
                if let Some(fragment) = &spec.email_like {
                    if !user.email.contains(fragment.as_str()) {
                        return false;
                    }
                }
                if let Some(id_list) = &spec.id_list {
                    if !id_list.contains(&user.id) {
                        return false;
                    }
                }
                true
            })
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|u| u.id);
        Ok(found)
    }

    async fn set_online(&self, user_id: i64, online: bool) -> Result<(), DomainError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| DomainError::NotFound(format!("User: {}", user_id)))?;
        user.online = online;
        user.last_activity = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryFriendRepo {
    friendships: DashMap<i64, HashSet<i64>>,
    // outgoing friend requests, keyed by sender
    requests: DashMap<i64, HashSet<i64>>,
}

impl MemoryFriendRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an established friendship (both directions).
    pub fn add_friendship(&self, a: i64, b: i64) {
        self.friendships.entry(a).or_default().insert(b);
        self.friendships.entry(b).or_default().insert(a);
    }

    /// Seed a pending friend request.
    pub fn add_friend_request(&self, from: i64, to: i64) {
        self.requests.entry(from).or_default().insert(to);
    }
}

#[async_trait]
impl FriendRepo for MemoryFriendRepo {
    async fn friends_of(&self, user_id: i64) -> Result<Vec<i64>, DomainError> {
        let mut ids: Vec<i64> = self
            .friendships
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn create_friendship(&self, user_id: i64, friend_id: i64) -> Result<(), DomainError> {
        let already = self
            .friendships
            .get(&user_id)
            .map(|set| set.contains(&friend_id))
            .unwrap_or(false);
        if already {
            return Err(DomainError::NotUnique(format!(
                "friendship: {} - {}",
                user_id, friend_id
            )));
        }
        self.add_friendship(user_id, friend_id);
        if let Some(mut pending) = self.requests.get_mut(&friend_id) {
            pending.remove(&user_id);
        }
        Ok(())
    }

    async fn incoming_request_ids(&self, user_id: i64) -> Result<Vec<i64>, DomainError> {
        let mut ids: Vec<i64> = self
            .requests
            .iter()
            .filter(|entry| entry.value().contains(&user_id))
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn outgoing_request_ids(&self, user_id: i64) -> Result<Vec<i64>, DomainError> {
        let mut ids: Vec<i64> = self
            .requests
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[derive(Default)]
pub struct MemoryRoomRepo {
    rooms: DashMap<i64, Room>,
    messages: DashMap<i64, Vec<ChatMessage>>,
    next_room_id: AtomicI64,
    next_msg_id: AtomicI64,
}

impl MemoryRoomRepo {
    pub fn new() -> Self {
        Self {
            next_room_id: AtomicI64::new(1),
            next_msg_id: AtomicI64::new(1),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RoomRepo for MemoryRoomRepo {
    async fn create_room(
        &self,
        creator_id: i64,
        members_id: Vec<i64>,
        private: bool,
    ) -> Result<i64, DomainError> {
        let room = Room {
            id: self.next_room_id.fetch_add(1, Ordering::Relaxed),
            creator_id,
            created_at: Utc::now(),
            members_id,
            private,
        };
        let id = room.id;
        self.rooms.insert(id, room);
        Ok(id)
    }

    async fn rooms_of(&self, member_id: i64) -> Result<Vec<Room>, DomainError> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().members_id.contains(&member_id))
            .map(|entry| entry.value().clone())
            .collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn room_by_id(&self, room_id: i64) -> Result<Room, DomainError> {
        self.rooms
            .get(&room_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| DomainError::NotFound(format!("Room: {}", room_id)))
    }

    async fn create_message(
        &self,
        creator_id: i64,
        room_id: i64,
        msg_type: i64,
        msg_body: String,
    ) -> Result<ChatMessage, DomainError> {
        let message = ChatMessage {
            id: self.next_msg_id.fetch_add(1, Ordering::Relaxed),
            creator_id,
            room_id,
            msg_type,
            msg_body,
            created_at: Utc::now(),
        };
        self.messages
            .entry(room_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn messages_in(&self, room_id: i64) -> Result<Vec<ChatMessage>, DomainError> {
        Ok(self
            .messages
            .get(&room_id)
            .map(|m| m.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_lookup_rejects_unknown_tokens() {
        let repo = MemoryUserRepo::new();
        let user = repo.add_user("alice@example.com");
        let token = repo.issue_token(user.id);

        assert_eq!(repo.user_by_token(&token).await.unwrap().id, user.id);
        assert!(matches!(
            repo.user_by_token("nope").await,
            Err(DomainError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn user_search_filters_by_email_and_ids() {
        let repo = MemoryUserRepo::new();
        let alice = repo.add_user("alice@example.com");
        let bob = repo.add_user("bob@example.com");

        let by_email = repo
            .get_users(&UserSearchSpec {
                email_like: Some("alice".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].id, alice.id);

        let by_ids = repo
            .get_users(&UserSearchSpec {
                id_list: Some(vec![bob.id]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_ids.len(), 1);
        assert_eq!(by_ids[0].id, bob.id);
    }

    #[tokio::test]
    async fn duplicate_friendship_is_not_unique() {
        let repo = MemoryFriendRepo::new();
        repo.create_friendship(1, 2).await.unwrap();
        assert!(matches!(
            repo.create_friendship(1, 2).await,
            Err(DomainError::NotUnique(_))
        ));
        assert_eq!(repo.friends_of(2).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn friend_requests_track_both_directions() {
        let repo = MemoryFriendRepo::new();
        repo.add_friend_request(1, 2);
        assert_eq!(repo.outgoing_request_ids(1).await.unwrap(), vec![2]);
        assert_eq!(repo.incoming_request_ids(2).await.unwrap(), vec![1]);

        // Accepting the request clears it.
        repo.create_friendship(2, 1).await.unwrap();
        assert!(repo.incoming_request_ids(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn messages_are_scoped_to_their_room() {
        let repo = MemoryRoomRepo::new();
        let room_a = repo.create_room(1, vec![1, 2], true).await.unwrap();
        let room_b = repo.create_room(1, vec![1, 3], true).await.unwrap();
        repo.create_message(1, room_a, 0, "hi".into()).await.unwrap();

        assert_eq!(repo.messages_in(room_a).await.unwrap().len(), 1);
        assert!(repo.messages_in(room_b).await.unwrap().is_empty());
        assert!(matches!(
            repo.room_by_id(999).await,
            Err(DomainError::NotFound(_))
        ));
    }
}
