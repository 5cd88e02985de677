//! Event and wire protocol types shared by the beadwatch server and clients.

pub mod error;
pub mod events;
pub mod ids;
pub mod protocol;

pub use error::{ModelError, Result as ModelResult};
pub use events::{ChangeEvent, ChangeKind, RepoSyncEvent, SyncKind};
pub use ids::{ItemId, RepoId};
pub use protocol::{
    ClientMessage, ErrorPayload, ServerMessage, SubscribedPayload,
    UnsubscribedPayload,
};
