use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use crate::{
    models::{
        ClientConfig, Config, ConfigMetadata, CorsConfig, RegistryConfig,
        ServerConfig, StoreLayoutConfig, WatchConfig,
    },
    sources::{EnvConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("beadwatch.toml"),
        PathBuf::from("config/beadwatch.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let env_config = EnvConfig::gather();
        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let (config, warnings) = compose_config(
            file_config,
            env_config,
            config_path,
            env_file_loaded,
        )?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = if let Some(path) = &self.options.config_path {
            (Some(path.clone()), true)
        } else if let Some(path) = &env_config.config_path {
            (Some(path.clone()), true)
        } else {
            let found = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned();
            (found, false)
        };

        let Some(path) = path else {
            return Ok((None, None));
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        tracing::debug!(path = %path.display(), "loading configuration file");
        let file_config = read_file_config(&path)?;
        Ok((Some(file_config), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if file_config.is_none() {
        warnings.push_with_hint(
            "No beadwatch.toml detected; using defaults and environment variables",
            "Create beadwatch.toml or set BEADWATCH_CONFIG to customise the watcher",
        );
    }

    let FileConfig {
        server: file_server,
        watch: file_watch,
        registry: file_registry,
        client: file_client,
        cors: file_cors,
    } = file_config.unwrap_or_default();

    let server_defaults = ServerConfig::default();
    let server_port = match env.server_port.as_deref() {
        Some(raw) => parse_value::<u16>("SERVER_PORT", raw)?,
        None => file_server.port.unwrap_or(server_defaults.port),
    };

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or(server_defaults.host),
        port: server_port,
        ws_path: env
            .ws_path
            .or(file_server.ws_path)
            .unwrap_or(server_defaults.ws_path),
        connection_buffer: file_server
            .connection_buffer
            .unwrap_or(server_defaults.connection_buffer),
    };

    let watch_defaults = WatchConfig::default();
    let store_defaults = StoreLayoutConfig::default();

    let debounce_window_ms = match env.debounce_ms.as_deref() {
        Some(raw) => parse_value::<u64>("BEADWATCH_DEBOUNCE_MS", raw)?,
        None => file_watch
            .debounce_window_ms
            .unwrap_or(watch_defaults.debounce_window_ms),
    };

    let refresh_interval = match env
        .refresh_interval
        .as_deref()
        .map(|raw| ("BEADWATCH_REFRESH_INTERVAL", raw))
        .or_else(|| {
            file_watch
                .refresh_interval
                .as_deref()
                .map(|raw| ("watch.refresh_interval", raw))
        }) {
        Some((key, raw)) => parse_duration(key, raw)?,
        None => watch_defaults.refresh_interval,
    };

    let watch = WatchConfig {
        debounce_window_ms,
        refresh_interval,
        event_channel_capacity: file_watch
            .event_channel_capacity
            .unwrap_or(watch_defaults.event_channel_capacity)
            .max(1),
        store: StoreLayoutConfig {
            store_dir: file_watch.store_dir.unwrap_or(store_defaults.store_dir),
            aggregate_file: file_watch
                .aggregate_file
                .unwrap_or(store_defaults.aggregate_file),
            item_dir: file_watch.item_dir.unwrap_or(store_defaults.item_dir),
            item_extension: file_watch
                .item_extension
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or(store_defaults.item_extension),
        },
    };

    let registry = RegistryConfig {
        path: env
            .registry_path
            .or(file_registry.path)
            .unwrap_or_else(|| RegistryConfig::default().path),
    };

    let client_defaults = ClientConfig::default();
    let client = ClientConfig {
        url: env
            .client_url
            .or(file_client.url)
            .unwrap_or(client_defaults.url),
        reconnect_floor_ms: file_client
            .reconnect_floor_ms
            .unwrap_or(client_defaults.reconnect_floor_ms),
        reconnect_ceiling_ms: file_client
            .reconnect_ceiling_ms
            .unwrap_or(client_defaults.reconnect_ceiling_ms),
        connect_timeout_ms: file_client
            .connect_timeout_ms
            .unwrap_or(client_defaults.connect_timeout_ms),
    };

    let cors = CorsConfig {
        allowed_origins: env
            .cors_allowed_origins
            .or(file_cors.allowed_origins)
            .unwrap_or_else(|| CorsConfig::default().allowed_origins),
    };

    let config = Config {
        server,
        watch,
        registry,
        client,
        cors,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    };

    for warning in validation::check_guard_rails(&config)?.iter() {
        match &warning.hint {
            Some(hint) => warnings.push_with_hint(&warning.message, hint),
            None => warnings.push(&warning.message),
        }
    }

    Ok((config, warnings))
}

fn parse_value<T: std::str::FromStr>(
    key: &'static str,
    raw: &str,
) -> Result<T, ConfigLoadError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigLoadError::InvalidValue {
            key,
            value: raw.to_string(),
        })
}

fn parse_duration(
    key: &'static str,
    raw: &str,
) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|_| {
        ConfigLoadError::InvalidValue {
            key,
            value: raw.to_string(),
        }
    })
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
