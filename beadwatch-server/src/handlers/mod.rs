pub mod handle_websocket;
pub mod watchers;

pub use handle_websocket::websocket_handler;
pub use watchers::{health_handler, list_watchers_handler, refresh_watchers_handler};
