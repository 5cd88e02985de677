pub mod app_state;
pub mod errors;
pub mod refresh;
pub mod watch_health;
pub mod websocket;
