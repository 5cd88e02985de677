//! Configuration for the beadwatch server and client.
//!
//! Values are resolved from a TOML file, then overridden by environment
//! variables (optionally seeded from a `.env` file). Both binaries go through
//! [`ConfigLoader`] so defaults live in exactly one place.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    ClientConfig, Config, ConfigMetadata, CorsConfig, RegistryConfig,
    ServerConfig, StoreLayoutConfig, WatchConfig,
};
pub use validation::{ConfigWarning, ConfigWarnings};
