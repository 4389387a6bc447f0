use axum::{routing::get, Router};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

async fn healthz() -> &'static str {
    "ok"
}

/// Build the axum router. The HTTP surface is deliberately thin: auth and
/// CRUD views live elsewhere; this process serves the real-time socket.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/healthz", get(healthz))
        .with_state(state)
}
