//! parley-server library.
//! Real-time connection and event-dispatch core for a chat backend; exposes
//! internal modules for integration testing. The binary entry point is in
//! main.rs.

pub mod config;
pub mod error;
pub mod handlers;
pub mod repo;
pub mod routes;
pub mod state;
pub mod ws;
