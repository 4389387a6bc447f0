//! Domain handlers routed by resource name, plus the startup wiring that
//! populates the handler registry.

pub mod command;
pub mod query;

use std::sync::Arc;

use crate::repo::{FriendRepo, RoomRepo, UserRepo};
use crate::ws::dispatch::HandlerRegistry;
use crate::ws::lifecycle::{OnConnectHandler, OnDisconnectHandler};
use crate::ws::registry::ConnectionRegistry;

/// Build the handler registry with the full default resource set. Called once
/// at startup; the registry is immutable afterwards.
pub fn default_registry(
    users: Arc<dyn UserRepo>,
    friends: Arc<dyn FriendRepo>,
    rooms: Arc<dyn RoomRepo>,
    connections: Arc<ConnectionRegistry>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register_command(
        "friend",
        Arc::new(command::FriendCommandHandler::new(friends.clone())),
    );
    registry.register_command(
        "room",
        Arc::new(command::RoomCommandHandler::new(rooms.clone())),
    );
    registry.register_command(
        "message",
        Arc::new(command::MessageCommandHandler::new(rooms.clone())),
    );

    registry.register_query(
        "user",
        Arc::new(query::UserSearchQueryHandler::new(users.clone())),
    );
    registry.register_query(
        "friend",
        Arc::new(query::FriendQueryHandler::new(
            users.clone(),
            friends.clone(),
        )),
    );
    registry.register_query(
        "friend_request",
        Arc::new(query::FriendRequestQueryHandler::new(
            users.clone(),
            friends.clone(),
        )),
    );
    registry.register_query("room", Arc::new(query::RoomQueryHandler::new(rooms.clone())));
    registry.register_query("message", Arc::new(query::MessageQueryHandler::new(rooms)));

    registry.set_on_connect(Arc::new(OnConnectHandler::new(
        users.clone(),
        friends.clone(),
    )));
    registry.set_on_disconnect(Arc::new(OnDisconnectHandler::new(
        users,
        friends,
        connections,
    )));

    registry
}
