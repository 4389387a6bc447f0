//! WebSocket upgrade endpoint with accept-time authentication.
//!
//! The session token travels in the `sid` header or the `?sid=` query
//! parameter. It is resolved through the user repository collaborator; an
//! unknown token is answered with HTTP 401 and the fail envelope before any
//! upgrade happens.

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::error::DomainError;
use crate::state::AppState;
use crate::ws::actor;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub sid: Option<String>,
}

/// GET /ws — upgrade an authenticated client connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = headers
        .get("sid")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or(params.sid);

    let Some(token) = token else {
        tracing::warn!("WebSocket connect without session token");
        return unauthorized();
    };

    match state.users.user_by_token(&token).await {
        Ok(user) => {
            tracing::info!(user_id = user.id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user.id))
        }
        Err(err) => {
            tracing::warn!(error = %err, "WebSocket auth failed");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(DomainError::Unauthorized.fail_body()),
    )
        .into_response()
}
