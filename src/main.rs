mod config;
mod error;
mod handlers;
mod repo;
mod routes;
mod state;
mod ws;

use std::sync::Arc;
use tokio::net::TcpListener;

use config::{generate_config_template, Config};
use repo::memory::{MemoryFriendRepo, MemoryRoomRepo, MemoryUserRepo};
use ws::registry::{ConnectionRegistry, CLOSE_GOING_AWAY};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "parley_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "parley_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("parley server v{} starting", env!("CARGO_PKG_VERSION"));

    // Repository collaborators. The in-memory implementations stand in for
    // whatever storage the deployment wires up.
    let users = Arc::new(MemoryUserRepo::new());
    let friends = Arc::new(MemoryFriendRepo::new());
    let rooms = Arc::new(MemoryRoomRepo::new());

    let connections = Arc::new(ConnectionRegistry::new());

    // Handler tables are populated once here and frozen.
    let handler_registry = handlers::default_registry(
        users.clone(),
        friends.clone(),
        rooms.clone(),
        connections.clone(),
    );

    let app_state = state::AppState {
        connections: connections.clone(),
        handlers: Arc::new(handler_registry),
        users,
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(connections))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then close every open session before axum stops
/// accepting and drains the remaining connection tasks.
async fn shutdown_signal(connections: Arc<ConnectionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!(
        clients = connections.connected_users(),
        "shutdown signal received, closing sessions"
    );
    connections.close_all(CLOSE_GOING_AWAY, "Server shutdown");
}
