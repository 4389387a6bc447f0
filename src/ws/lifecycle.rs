//! Connection lifecycle hooks: presence-changed notifications to friends.
//!
//! Both hooks are Command-shaped handlers: they return broadcasts that the
//! dispatcher delivers exactly like a command handler's. The disconnect hook
//! re-derives presence from the live session set — disconnecting one device
//! while another stays open must not mark the user offline.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::error::DomainError;
use crate::repo::{FriendRepo, UserRepo};
use crate::ws::dispatch::LifecycleHandler;
use crate::ws::protocol::{Broadcast, Command, CommandAction, ServerEvent};
use crate::ws::registry::{ConnectionRegistry, Session};

/// Build the presence-changed broadcast sent to a user's friends. The event
/// is a synthetic `friends`/update command so clients reuse their ordinary
/// command-done handling.
fn presence_changed(user_id: i64, online: bool, receivers: Vec<i64>) -> Broadcast {
    let command = Command {
        resource: "friends".to_string(),
        action: CommandAction::Update,
        payload: json!({"online": online, "id": user_id}),
        uid: "-".to_string(),
    };
    Broadcast {
        receivers,
        event: ServerEvent::CommandDone {
            command,
            user_id,
            result: json!({}),
        },
    }
}

/// Runs once a session is fully registered: persist the online flag and tell
/// the user's friends.
pub struct OnConnectHandler {
    users: Arc<dyn UserRepo>,
    friends: Arc<dyn FriendRepo>,
}

impl OnConnectHandler {
    pub fn new(users: Arc<dyn UserRepo>, friends: Arc<dyn FriendRepo>) -> Self {
        Self { users, friends }
    }
}

#[async_trait]
impl LifecycleHandler for OnConnectHandler {
    async fn handle(&self, session: &Session) -> Result<Vec<Broadcast>, DomainError> {
        self.users.set_online(session.user_id, true).await?;
        let friends_id = self.friends.friends_of(session.user_id).await?;
        if friends_id.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![presence_changed(session.user_id, true, friends_id)])
    }
}

/// Runs after the read loop exits and the session is unregistered. Broadcasts
/// "offline" only when no other session of the same user remains open.
pub struct OnDisconnectHandler {
    users: Arc<dyn UserRepo>,
    friends: Arc<dyn FriendRepo>,
    connections: Arc<ConnectionRegistry>,
}

impl OnDisconnectHandler {
    pub fn new(
        users: Arc<dyn UserRepo>,
        friends: Arc<dyn FriendRepo>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            users,
            friends,
            connections,
        }
    }
}

#[async_trait]
impl LifecycleHandler for OnDisconnectHandler {
    async fn handle(&self, session: &Session) -> Result<Vec<Broadcast>, DomainError> {
        // Live check against the registry, not a cached flag: another device
        // may still hold a session.
        if self.connections.is_online(session.user_id) {
            return Ok(Vec::new());
        }

        self.users.set_online(session.user_id, false).await?;
        let friends_id = self.friends.friends_of(session.user_id).await?;
        if friends_id.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![presence_changed(session.user_id, false, friends_id)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::{MemoryFriendRepo, MemoryUserRepo};
    use tokio::sync::mpsc;

    fn fixture() -> (
        Arc<MemoryUserRepo>,
        Arc<MemoryFriendRepo>,
        Arc<ConnectionRegistry>,
    ) {
        (
            Arc::new(MemoryUserRepo::new()),
            Arc::new(MemoryFriendRepo::new()),
            Arc::new(ConnectionRegistry::new()),
        )
    }

    fn session_for(user_id: i64) -> Session {
        // Receiver dropped: these tests inspect returned broadcasts, not
        // delivery.
        let (tx, _rx) = mpsc::unbounded_channel();
        Session::new(user_id, tx)
    }

    #[tokio::test]
    async fn connect_broadcasts_online_to_friends() {
        let (users, friends, _connections) = fixture();
        let alice = users.add_user("alice@example.com");
        let bob = users.add_user("bob@example.com");
        friends.add_friendship(alice.id, bob.id);

        let hook = OnConnectHandler::new(users.clone(), friends);
        let broadcasts = hook.handle(&session_for(alice.id)).await.unwrap();

        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].receivers, vec![bob.id]);
        match &broadcasts[0].event {
            ServerEvent::CommandDone {
                command, user_id, ..
            } => {
                assert_eq!(*user_id, alice.id);
                assert_eq!(command.payload["online"], true);
                assert_eq!(command.payload["id"], alice.id);
            }
            other => panic!("expected command-done, got {:?}", other),
        }
        assert!(users.user(alice.id).unwrap().online);
    }

    #[tokio::test]
    async fn connect_without_friends_broadcasts_nothing() {
        let (users, friends, _connections) = fixture();
        let alice = users.add_user("alice@example.com");

        let hook = OnConnectHandler::new(users, friends);
        let broadcasts = hook.handle(&session_for(alice.id)).await.unwrap();
        assert!(broadcasts.is_empty());
    }

    #[tokio::test]
    async fn disconnect_stays_silent_while_other_device_open() {
        let (users, friends, connections) = fixture();
        let alice = users.add_user("alice@example.com");
        let bob = users.add_user("bob@example.com");
        friends.add_friendship(alice.id, bob.id);

        // Device B is still registered when device A's hook runs.
        let remaining = session_for(alice.id);
        connections.register(&remaining);

        let hook = OnDisconnectHandler::new(users.clone(), friends, connections);
        let broadcasts = hook.handle(&session_for(alice.id)).await.unwrap();

        assert!(broadcasts.is_empty(), "user still online on another device");
    }

    #[tokio::test]
    async fn last_disconnect_broadcasts_offline() {
        let (users, friends, connections) = fixture();
        let alice = users.add_user("alice@example.com");
        let bob = users.add_user("bob@example.com");
        friends.add_friendship(alice.id, bob.id);
        users.set_online(alice.id, true).await.unwrap();

        let hook = OnDisconnectHandler::new(users.clone(), friends, connections);
        let broadcasts = hook.handle(&session_for(alice.id)).await.unwrap();

        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].receivers, vec![bob.id]);
        match &broadcasts[0].event {
            ServerEvent::CommandDone { command, .. } => {
                assert_eq!(command.payload["online"], false);
            }
            other => panic!("expected command-done, got {:?}", other),
        }
        assert!(!users.user(alice.id).unwrap().online);
    }
}
