use std::sync::Arc;

use crate::repo::UserRepo;
use crate::ws::dispatch::HandlerRegistry;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to handlers via the axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Active sessions per user; the only concurrently-mutated shared state.
    pub connections: Arc<ConnectionRegistry>,
    /// Resource-name → handler tables, frozen at startup.
    pub handlers: Arc<HandlerRegistry>,
    /// User lookup collaborator, used at connection accept time.
    pub users: Arc<dyn UserRepo>,
}
