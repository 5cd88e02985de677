//! # beadwatch core
//!
//! Turns filesystem activity inside managed repositories into ordered,
//! debounced change events.
//!
//! - [`classify`]: maps a changed path to the item it describes
//! - [`fs_watch`]: per-repository watchers, ignore rules, watch target
//!   resolution and the [`ChangeDebouncer`]
//! - [`registry`]: the list of repositories to watch
//! - [`sink`]: where finalized events are published
//!
//! ```no_run
//! use std::sync::Arc;
//! use beadwatch_core::{FsWatchConfig, RepoEventSink, RepoWatcherPool};
//! use beadwatch_model::{RepoId, ServerMessage};
//!
//! struct Print;
//!
//! impl RepoEventSink for Print {
//!     fn publish(&self, repo_id: &RepoId, message: ServerMessage) -> usize {
//!         println!("{repo_id}: {}", message.event_name());
//!         0
//!     }
//! }
//!
//! # async fn run() -> beadwatch_core::Result<()> {
//! let pool = RepoWatcherPool::without_observer(
//!     FsWatchConfig::default(),
//!     Arc::new(Print),
//! );
//! pool.watch(RepoId::from("repo-1"), "/work/repo-1").await?;
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod error;
pub mod fs_watch;
pub mod registry;
pub mod sink;

pub use classify::{Classification, classify};
pub use error::{Result, WatchError};
pub use fs_watch::{
    ChangeDebouncer, FsWatchConfig, FsWatchObserver, NoopFsWatchObserver,
    PathProbe, RefreshReport, RepoWatchSnapshot, RepoWatcherPool, StoreLayout,
    WatchStatus, WatchTarget,
};
pub use registry::{JsonFileRegistry, RegisteredRepo, RepoRegistry, StaticRegistry};
pub use sink::RepoEventSink;
