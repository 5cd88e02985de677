//! Print change notifications for one or more repositories as JSON lines.

use std::path::PathBuf;

use anyhow::Context;
use beadwatch_client::ClientSyncAgent;
use beadwatch_config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use beadwatch_model::{ChangeEvent, RepoId};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "beadwatch-tail")]
#[command(about = "Follow item changes pushed by a beadwatch server")]
struct Cli {
    /// Repository ids to subscribe to
    #[arg(required = true)]
    repos: Vec<String>,

    /// Server WebSocket URL (overrides config)
    #[arg(short, long)]
    url: Option<String>,

    /// Path to a beadwatch.toml configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,beadwatch_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: None,
    })
    .load()
    .context("failed to load configuration")?;
    for warning in warnings.iter() {
        warn!(message = %warning.message, "configuration warning");
    }
    if let Some(url) = cli.url {
        config.client.url = url;
    }

    let agent = ClientSyncAgent::from_config(&config.client)
        .context("invalid client configuration")?;

    agent.on_created(|event| print_event("created", event));
    agent.on_changed(|event| print_event("changed", event));
    agent.on_deleted(|event| print_event("deleted", event));
    agent.on_sync(|event| match serde_json::to_string(event) {
        Ok(line) => println!("{{\"event\":\"sync\",\"data\":{line}}}"),
        Err(err) => warn!(error = %err, "failed to encode sync event"),
    });
    agent.on_error(|payload| {
        warn!(code = ?payload.code, message = %payload.message, "error");
    });

    for repo in &cli.repos {
        agent.subscribe(RepoId::new(repo.as_str()));
    }
    info!(url = %config.client.url, repos = cli.repos.len(), "following");
    agent.connect();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    agent.disconnect().await;
    Ok(())
}

fn print_event(kind: &str, event: &ChangeEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{{\"event\":\"{kind}\",\"data\":{line}}}"),
        Err(err) => warn!(error = %err, "failed to encode change event"),
    }
}
