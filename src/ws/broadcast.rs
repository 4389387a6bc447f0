//! Broadcast fan-out: push one server event to every open session of every
//! receiver.
//!
//! Delivery is best-effort against a snapshot of the registry taken at call
//! time. A session that closed a moment ago is skipped silently; a receiver
//! who is offline simply gets nothing. Nothing here fails upward.

use futures_util::future::join_all;
use std::collections::HashSet;

use crate::ws::protocol::{self, Broadcast};
use crate::ws::registry::ConnectionRegistry;

/// Deliver one broadcast. The event is serialized once and pushed to every
/// session of every receiver (multi-device fan-out).
pub async fn deliver(connections: &ConnectionRegistry, broadcast: &Broadcast) {
    let text = match protocol::encode(&broadcast.event) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "dropping undeliverable broadcast");
            return;
        }
    };

    // Receivers are a set: a duplicated id (a friend command naming the
    // issuer, say) must not double-deliver to that user's sessions.
    let mut seen = HashSet::new();
    for receiver in &broadcast.receivers {
        if !seen.insert(*receiver) {
            continue;
        }
        let sessions = connections.sessions_of(*receiver);
        if sessions.is_empty() {
            continue;
        }
        tracing::trace!(receiver, sessions = sessions.len(), "broadcast fan-out");
        for session in sessions {
            // Closed channels are swallowed inside send_raw.
            session.send_raw(text.clone());
        }
    }
}

/// Deliver a batch of broadcasts concurrently and wait for all of them.
/// Relative order across receivers is unspecified, but every receiver set is
/// fully attempted before this returns.
pub async fn deliver_all(connections: &ConnectionRegistry, broadcasts: Vec<Broadcast>) {
    if broadcasts.is_empty() {
        return;
    }
    join_all(
        broadcasts
            .iter()
            .map(|broadcast| deliver(connections, broadcast)),
    )
    .await;
}
