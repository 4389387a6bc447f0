//! Command handlers: write intents that may fan out as broadcasts.
//!
//! Validation and not-found conditions come back as `DomainError` and are
//! translated into fail replies by the dispatcher; the connection stays open
//! and no broadcasts are produced.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::DomainError;
use crate::repo::{FriendRepo, RoomRepo};
use crate::ws::dispatch::CommandHandler;
use crate::ws::protocol::{Broadcast, Command, ServerEvent};
use crate::ws::registry::Session;

fn command_done(command: &Command, user_id: i64, result: Value) -> ServerEvent {
    ServerEvent::CommandDone {
        command: command.clone(),
        user_id,
        result,
    }
}

/// `friend` — establish friendships.
pub struct FriendCommandHandler {
    friends: Arc<dyn FriendRepo>,
}

impl FriendCommandHandler {
    pub fn new(friends: Arc<dyn FriendRepo>) -> Self {
        Self { friends }
    }
}

#[async_trait]
impl CommandHandler for FriendCommandHandler {
    async fn create(
        &self,
        command: &Command,
        session: &Session,
    ) -> Result<Vec<Broadcast>, DomainError> {
        let Some(friend_id) = command.payload.get("user_id").and_then(Value::as_i64) else {
            return Err(DomainError::Validation(
                "not found user_id in create friend payload".to_string(),
            ));
        };
        let user_id = session.user_id;
        self.friends.create_friendship(user_id, friend_id).await?;

        // Both parties learn about the new friendship.
        Ok(vec![Broadcast {
            receivers: vec![friend_id, user_id],
            event: command_done(command, user_id, json!({})),
        }])
    }
}

/// `room` — create chat rooms.
pub struct RoomCommandHandler {
    rooms: Arc<dyn RoomRepo>,
}

impl RoomCommandHandler {
    pub fn new(rooms: Arc<dyn RoomRepo>) -> Self {
        Self { rooms }
    }
}

#[async_trait]
impl CommandHandler for RoomCommandHandler {
    async fn create(
        &self,
        command: &Command,
        session: &Session,
    ) -> Result<Vec<Broadcast>, DomainError> {
        let members = command
            .payload
            .get("members_id")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_i64)
                    .collect::<Vec<i64>>()
            });
        let Some(mut members_id) = members else {
            return Err(DomainError::Validation("members_id: Missing".to_string()));
        };

        // The creator is always a member; dedup in case the client sent them.
        members_id.push(session.user_id);
        members_id.sort_unstable();
        members_id.dedup();

        let private = command
            .payload
            .get("private")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let room_id = self
            .rooms
            .create_room(session.user_id, members_id.clone(), private)
            .await?;

        Ok(vec![Broadcast {
            receivers: members_id,
            event: command_done(command, session.user_id, json!({"id": room_id})),
        }])
    }
}

/// `message` — post messages into rooms.
pub struct MessageCommandHandler {
    rooms: Arc<dyn RoomRepo>,
}

impl MessageCommandHandler {
    pub fn new(rooms: Arc<dyn RoomRepo>) -> Self {
        Self { rooms }
    }
}

#[async_trait]
impl CommandHandler for MessageCommandHandler {
    async fn create(
        &self,
        command: &Command,
        session: &Session,
    ) -> Result<Vec<Broadcast>, DomainError> {
        let Some(room_id) = command.payload.get("room_id").and_then(Value::as_i64) else {
            return Err(DomainError::Validation("room_id: Missing".to_string()));
        };
        let Some(msg_type) = command.payload.get("msg_type").and_then(Value::as_i64) else {
            return Err(DomainError::Validation("msg_type: Missing".to_string()));
        };
        let Some(msg_body) = command.payload.get("msg_body").and_then(Value::as_str) else {
            return Err(DomainError::Validation("msg_body: Missing".to_string()));
        };

        let room = self.rooms.room_by_id(room_id).await?;

        let message = self
            .rooms
            .create_message(session.user_id, room_id, msg_type, msg_body.to_string())
            .await?;

        Ok(vec![Broadcast {
            receivers: room.members_id,
            event: command_done(command, session.user_id, json!([message])),
        }])
    }
}
