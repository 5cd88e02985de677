use thiserror::Error;
use url::Url;

use crate::models::Config;

/// Non-fatal observation about the resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(
        &mut self,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

/// Combinations that would leave the pipeline unable to function.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error(
        "client.reconnect_floor_ms ({floor}) exceeds client.reconnect_ceiling_ms ({ceiling})"
    )]
    BackoffInverted { floor: u64, ceiling: u64 },
    #[error("client.reconnect_floor_ms must be greater than zero")]
    ZeroBackoffFloor,
    #[error("server.ws_path must start with '/': {0}")]
    WsPath(String),
    #[error("client.url must be a ws:// or wss:// URL: {0}")]
    ClientUrl(String),
    #[error("server.connection_buffer must be greater than zero")]
    ZeroConnectionBuffer,
}

pub fn check_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if !config.server.ws_path.starts_with('/') {
        return Err(ConfigGuardRailError::WsPath(config.server.ws_path.clone()));
    }
    if config.server.connection_buffer == 0 {
        return Err(ConfigGuardRailError::ZeroConnectionBuffer);
    }

    let client = &config.client;
    if client.reconnect_floor_ms == 0 {
        return Err(ConfigGuardRailError::ZeroBackoffFloor);
    }
    if client.reconnect_floor_ms > client.reconnect_ceiling_ms {
        return Err(ConfigGuardRailError::BackoffInverted {
            floor: client.reconnect_floor_ms,
            ceiling: client.reconnect_ceiling_ms,
        });
    }

    match Url::parse(&client.url) {
        Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
        _ => return Err(ConfigGuardRailError::ClientUrl(client.url.clone())),
    }

    if config.cors.is_wildcard_included() {
        warnings.push_with_hint(
            "CORS allows any origin",
            "Set cors.allowed_origins to the viewer's origin when exposing the server beyond localhost",
        );
    }

    if config.watch.debounce_window_ms > 5_000 {
        warnings.push(format!(
            "watch.debounce_window_ms is {}ms; clients will see noticeably delayed updates",
            config.watch.debounce_window_ms
        ));
    }

    Ok(warnings)
}
