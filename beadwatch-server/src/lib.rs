//! # beadwatch server
//!
//! Watches managed repositories for item store changes and pushes them over
//! WebSocket to every client subscribed to the repository's room.
//!
//! - [`infra::websocket`]: connection registry and per-repository rooms
//! - [`handlers`]: the WebSocket session loop and status endpoints
//! - [`routes`]: router assembly
//! - [`infra::refresh`]: periodic reconciliation with the repository registry

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_app;
