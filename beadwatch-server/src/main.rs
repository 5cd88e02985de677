//! # beadwatch-server
//!
//! Realtime change notifications for repository item stores.

use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use beadwatch_config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use beadwatch_server::{
    AppState, create_app, infra::refresh::spawn_periodic_refresh,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "beadwatch-server")]
#[command(about = "Push repository item changes to WebSocket subscribers")]
struct Cli {
    /// Path to a beadwatch.toml configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Repository registry document (overrides config)
    #[arg(long)]
    registry: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host.clone() {
        config.server.host = host;
    }
    if let Some(registry) = cli.registry.clone() {
        config.registry.path = registry;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    info!(
        watch.debounce_ms = config.watch.debounce_window_ms,
        watch.refresh_interval =
            %humantime::format_duration(config.watch.refresh_interval),
        registry = %config.registry.path.display(),
        ws_path = %config.server.ws_path,
        "watch configuration in effect"
    );

    let bind_address = config.server.bind_address();
    let refresh_interval = config.watch.refresh_interval;

    let state = AppState::from_config(config);

    match state
        .watcher_pool
        .refresh_from(state.registry.as_ref())
        .await
    {
        Ok(report) => info!(
            started = report.started.len(),
            degraded = report.degraded.len(),
            "initial watcher set started"
        ),
        Err(err) => {
            warn!(error = %err, "failed to load repositories; will retry on refresh")
        }
    }

    let shutdown = CancellationToken::new();
    let refresher = spawn_periodic_refresh(
        state.clone(),
        refresh_interval,
        shutdown.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    let addr: SocketAddr = listener.local_addr()?;
    info!("Starting beadwatch server on {}", addr);

    let app = create_app(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    shutdown.cancel();
    let _ = refresher.await;
    state.watcher_pool.shutdown().await;
    info!("beadwatch server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
