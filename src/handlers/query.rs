//! Query handlers: reads answered directly on the issuing session as
//! `{"response": ..., "query": {...}}` envelopes. Nothing here broadcasts.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::error::DomainError;
use crate::repo::{FriendRepo, RoomRepo, UserRepo, UserSearchSpec};
use crate::ws::dispatch::QueryHandler;
use crate::ws::protocol::{Query, ServerEvent};
use crate::ws::registry::Session;

fn reply(session: &Session, query: &Query, response: Value) {
    session.send_event(&ServerEvent::QueryReply {
        response,
        query: query.clone(),
    });
}

fn to_json<T: serde::Serialize>(items: &[T]) -> Result<Value, DomainError> {
    serde_json::to_value(items).map_err(|e| DomainError::Internal(e.to_string()))
}

fn id_list(payload: &Value, key: &str) -> Option<Vec<i64>> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_i64).collect())
}

/// `user` — search users by email fragment and/or id list.
pub struct UserSearchQueryHandler {
    users: Arc<dyn UserRepo>,
}

impl UserSearchQueryHandler {
    pub fn new(users: Arc<dyn UserRepo>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl QueryHandler for UserSearchQueryHandler {
    async fn handle(&self, query: &Query, session: &Session) -> Result<(), DomainError> {
        let spec = UserSearchSpec {
            email_like: query
                .payload
                .get("q")
                .and_then(Value::as_str)
                .map(str::to_string),
            id_list: id_list(&query.payload, "id_list"),
        };
        let users = self.users.get_users(&spec).await?;
        reply(session, query, to_json(&users)?);
        Ok(())
    }
}

/// `friend` — the caller's friend list, as full user records.
pub struct FriendQueryHandler {
    users: Arc<dyn UserRepo>,
    friends: Arc<dyn FriendRepo>,
}

impl FriendQueryHandler {
    pub fn new(users: Arc<dyn UserRepo>, friends: Arc<dyn FriendRepo>) -> Self {
        Self { users, friends }
    }
}

#[async_trait]
impl QueryHandler for FriendQueryHandler {
    async fn handle(&self, query: &Query, session: &Session) -> Result<(), DomainError> {
        let friends_id = self.friends.friends_of(session.user_id).await?;
        let users = if friends_id.is_empty() {
            Vec::new()
        } else {
            self.users
                .get_users(&UserSearchSpec {
                    id_list: Some(friends_id),
                    ..Default::default()
                })
                .await?
        };
        reply(session, query, to_json(&users)?);
        Ok(())
    }
}

/// `friend_request` — pending requests; payload flags pick the directions.
pub struct FriendRequestQueryHandler {
    users: Arc<dyn UserRepo>,
    friends: Arc<dyn FriendRepo>,
}

impl FriendRequestQueryHandler {
    pub fn new(users: Arc<dyn UserRepo>, friends: Arc<dyn FriendRepo>) -> Self {
        Self { users, friends }
    }

    async fn users_by_ids(&self, ids: Vec<i64>) -> Result<Vec<crate::repo::User>, DomainError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.users
            .get_users(&UserSearchSpec {
                id_list: Some(ids),
                ..Default::default()
            })
            .await
    }
}

#[async_trait]
impl QueryHandler for FriendRequestQueryHandler {
    async fn handle(&self, query: &Query, session: &Session) -> Result<(), DomainError> {
        let mut response = Map::new();
        if query
            .payload
            .get("incoming")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let ids = self.friends.incoming_request_ids(session.user_id).await?;
            let users = self.users_by_ids(ids).await?;
            response.insert("incoming".to_string(), to_json(&users)?);
        }
        if query
            .payload
            .get("outgoing")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let ids = self.friends.outgoing_request_ids(session.user_id).await?;
            let users = self.users_by_ids(ids).await?;
            response.insert("outgoing".to_string(), to_json(&users)?);
        }
        reply(session, query, Value::Object(response));
        Ok(())
    }
}

/// `room` — rooms the caller is a member of.
pub struct RoomQueryHandler {
    rooms: Arc<dyn RoomRepo>,
}

impl RoomQueryHandler {
    pub fn new(rooms: Arc<dyn RoomRepo>) -> Self {
        Self { rooms }
    }
}

#[async_trait]
impl QueryHandler for RoomQueryHandler {
    async fn handle(&self, query: &Query, session: &Session) -> Result<(), DomainError> {
        let rooms = self.rooms.rooms_of(session.user_id).await?;
        reply(session, query, to_json(&rooms)?);
        Ok(())
    }
}

/// `message` — message history of one room.
pub struct MessageQueryHandler {
    rooms: Arc<dyn RoomRepo>,
}

impl MessageQueryHandler {
    pub fn new(rooms: Arc<dyn RoomRepo>) -> Self {
        Self { rooms }
    }
}

#[async_trait]
impl QueryHandler for MessageQueryHandler {
    async fn handle(&self, query: &Query, session: &Session) -> Result<(), DomainError> {
        let Some(room_id) = query.payload.get("room_id").and_then(Value::as_i64) else {
            return Err(DomainError::Validation(
                "not found room_id in message query payload".to_string(),
            ));
        };
        let messages = self.rooms.messages_in(room_id).await?;
        reply(session, query, to_json(&messages)?);
        Ok(())
    }
}
