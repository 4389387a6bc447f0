//! Live-connection bookkeeping: sessions, per-user presence, and the
//! process-wide connection registry.
//!
//! The registry is the only shared mutable structure in this core. DashMap
//! serializes all mutation of one user's presence entry through its per-key
//! lock while keeping different users on different shards, so broadcast
//! fan-out for user A never contends with a connect/disconnect for user B.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::DomainError;
use crate::ws::protocol::{self, ServerEvent};

/// Sender half of a connection's outbound channel. The writer task on the
/// other end owns the socket sink; anything holding a clone of this can push
/// frames to that client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Close code sent to every open session on server shutdown ("going away").
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code for an unexpected handler failure (the single fatal case).
pub const CLOSE_SERVER_ERROR: u16 = 1011;

/// One live socket belonging to one authenticated user.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: i64,
    tx: ConnectionSender,
}

impl Session {
    pub fn new(user_id: i64, tx: ConnectionSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
        }
    }

    /// Push a pre-serialized frame. A closed channel means the socket is
    /// already gone; that is not an error for the caller.
    pub fn send_raw(&self, text: String) {
        let _ = self.tx.send(Message::Text(Utf8Bytes::from(text)));
    }

    pub fn send_json(&self, body: &Value) {
        match serde_json::to_string(body) {
            Ok(text) => self.send_raw(text),
            Err(e) => tracing::warn!(session_id = %self.id, error = %e, "JSON encode failed"),
        }
    }

    pub fn send_event(&self, event: &ServerEvent) {
        match protocol::encode(event) {
            Ok(text) => self.send_raw(text),
            Err(e) => tracing::warn!(session_id = %self.id, error = %e, "event encode failed"),
        }
    }

    /// Reply a fail envelope on this session; the connection stays open.
    pub fn send_fail(&self, err: &DomainError) {
        self.send_json(&err.fail_body());
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_string()),
        })));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The set of one user's concurrently open sessions.
/// Online status is always derived from the live set, never cached.
#[derive(Debug, Default)]
pub struct ClientPresence {
    sessions: Vec<Session>,
}

impl ClientPresence {
    pub fn online(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Process-wide map from user id to that user's open sessions.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: DashMap<i64, ClientPresence>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to its user's presence set, creating the set if absent.
    /// Registering the same session twice is a no-op.
    pub fn register(&self, session: &Session) {
        let mut entry = self.clients.entry(session.user_id).or_default();
        if !entry.sessions.iter().any(|s| s.id == session.id) {
            entry.sessions.push(session.clone());
        }
        let count = entry.sessions.len();
        drop(entry);
        tracing::debug!(
            user_id = session.user_id,
            session_id = %session.id,
            sessions = count,
            "session registered"
        );
    }

    /// Remove a session; a no-op if it is already gone. Tolerates the
    /// double-unregister race between an explicit close and the read loop
    /// winding down.
    pub fn unregister(&self, user_id: i64, session_id: Uuid) {
        if let Some(mut entry) = self.clients.get_mut(&user_id) {
            entry.sessions.retain(|s| s.id != session_id);
        }
        // Evict the entry only while it is still empty; remove_if holds the
        // entry lock, so a concurrent register cannot be lost.
        self.clients
            .remove_if(&user_id, |_, presence| presence.sessions.is_empty());
        tracing::debug!(user_id, session_id = %session_id, "session unregistered");
    }

    /// True iff the user has at least one open session right now.
    pub fn is_online(&self, user_id: i64) -> bool {
        self.clients
            .get(&user_id)
            .map(|p| p.online())
            .unwrap_or(false)
    }

    /// Snapshot of a user's sessions at call time. A session opened after the
    /// snapshot simply misses whatever is being delivered against it.
    pub fn sessions_of(&self, user_id: i64) -> Vec<Session> {
        self.clients
            .get(&user_id)
            .map(|p| p.sessions.clone())
            .unwrap_or_default()
    }

    pub fn session_count(&self, user_id: i64) -> usize {
        self.clients
            .get(&user_id)
            .map(|p| p.session_count())
            .unwrap_or(0)
    }

    pub fn connected_users(&self) -> usize {
        self.clients.len()
    }

    /// Close every open session, e.g. on server shutdown.
    pub fn close_all(&self, code: u16, reason: &str) {
        for entry in self.clients.iter() {
            for session in &entry.value().sessions {
                session.close(code, reason);
            }
        }
    }
}
