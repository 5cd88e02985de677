use std::path::PathBuf;
use std::time::Duration;

/// Fully resolved configuration shared by the server and client binaries.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub watch: WatchConfig,
    pub registry: RegistryConfig,
    pub client: ClientConfig,
    pub cors: CorsConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Route the WebSocket upgrade is served on.
    pub ws_path: String,
    /// Outbound queue depth per connection. A subscriber that falls this far
    /// behind starts losing messages instead of stalling the broadcaster.
    pub connection_buffer: usize,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            ws_path: "/socket".to_string(),
            connection_buffer: 256,
        }
    }
}

/// Filesystem watch tuning.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Quiet window applied per (repository, path, kind) before an event is
    /// emitted.
    pub debounce_window_ms: u64,
    /// How often the watcher set is reconciled against the registry.
    pub refresh_interval: Duration,
    /// Capacity of the channel between OS callbacks and a repository's pump.
    pub event_channel_capacity: usize,
    pub store: StoreLayoutConfig,
}

impl WatchConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms.max(1))
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 100,
            refresh_interval: Duration::from_secs(30),
            event_channel_capacity: 1024,
            store: StoreLayoutConfig::default(),
        }
    }
}

/// Where a repository keeps its item store, relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayoutConfig {
    pub store_dir: String,
    pub aggregate_file: String,
    pub item_dir: String,
    pub item_extension: String,
}

impl Default for StoreLayoutConfig {
    fn default() -> Self {
        Self {
            store_dir: ".beads".to_string(),
            aggregate_file: "issues.jsonl".to_string(),
            item_dir: "issues".to_string(),
            item_extension: "md".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// JSON document listing managed repositories.
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: home.join(".beads-sv").join("config.json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub reconnect_floor_ms: u64,
    pub reconnect_ceiling_ms: u64,
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    pub fn reconnect_floor(&self) -> Duration {
        Duration::from_millis(self.reconnect_floor_ms)
    }

    pub fn reconnect_ceiling(&self) -> Duration {
        Duration::from_millis(self.reconnect_ceiling_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000/socket".to_string(),
            reconnect_floor_ms: 1_000,
            reconnect_ceiling_ms: 5_000,
            connect_timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins
            .iter()
            .any(|origin| origin.trim() == "*")
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Provenance details, logged once at startup.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
