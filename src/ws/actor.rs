//! Actor-per-connection: one task owns the socket's read half, a writer task
//! owns the sink, and an mpsc channel in between lets the rest of the system
//! push frames to this client.
//!
//! Frames are processed strictly sequentially: frame N+1 is not decoded until
//! frame N's handling — including delivery of its broadcasts — has been
//! awaited. A bad frame gets a fail reply and the loop continues; only a
//! transport error, an explicit close, or a fatal dispatch outcome ends it.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::dispatch::{DispatchOutcome, Dispatcher};
use crate::ws::protocol;
use crate::ws::registry::Session;

/// Server sends a WebSocket ping every 30 seconds to reap dead connections.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// If no pong arrives within 10 seconds after a ping, the connection is gone.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run an authenticated connection to completion.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let session = Session::new(user_id, tx.clone());
    state.connections.register(&session);

    tracing::info!(
        user_id,
        session_id = %session.id,
        sessions = state.connections.session_count(user_id),
        "session started"
    );

    // Writer task: owns the sink, forwards everything pushed on the channel.
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Ping task: periodic pings, closed on pong timeout.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the immediate first tick.
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task is gone, so is the connection.
                break;
            }
            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    let dispatcher = Dispatcher::new(state.handlers.clone(), state.connections.clone());

    // Registration is complete before the hook runs; a slow or failing hook
    // cannot prevent the socket from existing.
    dispatcher.run_connect_hook(&session).await;

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => match protocol::decode(&text) {
                    Ok(event) => {
                        if dispatcher.dispatch(event, &session).await == DispatchOutcome::Close {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(user_id, error = %err, "undecodable frame");
                        session.send_fail(&err.into());
                    }
                },
                Message::Binary(_) => {
                    tracing::debug!(user_id, "received binary frame (expected JSON text)");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(user_id, reason = ?frame, "client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();

    // Unregister before the disconnect hook so the hook sees the live
    // remaining-session state of this user.
    state.connections.unregister(user_id, session.id);
    dispatcher.run_disconnect_hook(&session).await;

    tracing::info!(user_id, session_id = %session.id, "session stopped");

    // Drop the channel senders so the writer drains queued frames (a pending
    // close frame in particular) and exits; abort only if the peer stalls.
    let session_id = session.id;
    drop(session);
    drop(tx);
    if timeout(Duration::from_secs(5), &mut writer_handle).await.is_err() {
        tracing::debug!(user_id, session_id = %session_id, "writer task stalled, aborting");
        writer_handle.abort();
    }
}

/// Forward frames from the connection's channel to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // Send failed: the socket is broken.
            break;
        }
    }
}
