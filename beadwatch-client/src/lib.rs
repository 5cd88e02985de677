//! Subscription client for the beadwatch realtime server.
//!
//! [`ClientSyncAgent`] keeps a session open with bounded exponential backoff,
//! replays its subscription set after every reconnect and fans server pushes
//! out to registered callbacks.
//!
//! ```no_run
//! use beadwatch_client::ClientSyncAgent;
//! use beadwatch_config::ClientConfig;
//!
//! # async fn demo() -> Result<(), beadwatch_client::ClientError> {
//! let agent = ClientSyncAgent::from_config(&ClientConfig::default())?;
//! agent.on_changed(|event| println!("{:?} changed", event.item_id()));
//! agent.subscribe("alpha-YWJj");
//! agent.connect();
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod backoff;
pub mod error;
pub mod listeners;
pub mod state;
pub mod transport;

pub use agent::{
    AgentOptions, ClientSyncAgent, ItemCallbacks, ItemWatch,
    TRANSPORT_ERROR_CODE,
};
pub use backoff::ReconnectPolicy;
pub use error::{ClientError, Result};
pub use listeners::{ListenerCategory, ListenerHandle, ListenerRegistry};
pub use state::ConnectionState;
pub use transport::{ClientChannel, Connector, WebSocketConnector};
