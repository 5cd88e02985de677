use std::{fmt, sync::Arc};

use beadwatch_config::Config;
use beadwatch_core::{
    FsWatchConfig, JsonFileRegistry, RepoEventSink, RepoRegistry,
    RepoWatcherPool,
};

use crate::infra::watch_health::WatchHealth;
use crate::infra::websocket::ConnectionManager;

pub type WatcherPool = RepoWatcherPool<WatchHealth>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub websocket_manager: Arc<ConnectionManager>,
    pub watcher_pool: Arc<WatcherPool>,
    pub watch_health: Arc<WatchHealth>,
    pub registry: Arc<dyn RepoRegistry>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("websocket_manager", &self.websocket_manager)
            .field("watcher_pool", &self.watcher_pool)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the broadcaster, watcher pool and registry together. The pool
    /// publishes straight into the connection manager. Must run inside a
    /// tokio runtime.
    pub fn new(config: Config, registry: Arc<dyn RepoRegistry>) -> Self {
        let websocket_manager = Arc::new(ConnectionManager::new());
        let watch_health = Arc::new(WatchHealth::new());
        let sink: Arc<dyn RepoEventSink> = websocket_manager.clone();
        let watcher_pool = Arc::new(RepoWatcherPool::new(
            FsWatchConfig::from(&config.watch),
            sink,
            Arc::clone(&watch_health),
        ));

        Self {
            config: Arc::new(config),
            websocket_manager,
            watcher_pool,
            watch_health,
            registry,
        }
    }

    /// State backed by the registry file named in the configuration.
    pub fn from_config(config: Config) -> Self {
        let registry: Arc<dyn RepoRegistry> =
            Arc::new(JsonFileRegistry::new(config.registry.path.clone()));
        Self::new(config, registry)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
