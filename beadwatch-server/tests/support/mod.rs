#![allow(dead_code)]

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use beadwatch_config::Config;
use beadwatch_core::{RegisteredRepo, RepoRegistry, StaticRegistry};
use beadwatch_model::{ClientMessage, ServerMessage};
use beadwatch_server::{AppState, create_app};
use futures_util::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tokio_util::sync::CancellationToken;

pub const DEBOUNCE_MS: u64 = 50;

/// Config tuned for tests: short debounce, defaults everywhere else.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.watch.debounce_window_ms = DEBOUNCE_MS;
    config
}

/// Lay out `<root>/<name>/.beads/{issues.jsonl,issues/}`.
pub fn make_repo(root: &Path, name: &str) -> Result<PathBuf> {
    let repo = root.join(name);
    let store = repo.join(".beads");
    std::fs::create_dir_all(store.join("issues"))
        .context("create item directory")?;
    std::fs::write(store.join("issues.jsonl"), "{\"id\":\"bd-1\"}\n")
        .context("create aggregate file")?;
    Ok(repo)
}

#[derive(Debug)]
pub struct TestEnv {
    pub state: AppState,
    pub registry: Arc<StaticRegistry>,
    pub root: PathBuf,
    _tempdir: TempDir,
}

impl TestEnv {
    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn aggregate_file(&self, name: &str) -> PathBuf {
        self.repo_path(name).join(".beads").join("issues.jsonl")
    }

    pub fn item_file(&self, name: &str, item: &str) -> PathBuf {
        self.repo_path(name)
            .join(".beads")
            .join("issues")
            .join(format!("{item}.md"))
    }

    pub fn registered(&self, names: &[&str]) -> Vec<RegisteredRepo> {
        names
            .iter()
            .map(|name| RegisteredRepo::new(*name, self.repo_path(name)))
            .collect()
    }
}

/// Create one repository per name and a state whose registry lists them.
/// Watchers are started before returning.
pub async fn build_env(names: &[&str]) -> Result<TestEnv> {
    let tempdir = TempDir::new().context("create tempdir")?;
    let root = tempdir.path().canonicalize()?;
    for name in names {
        make_repo(&root, name)?;
    }

    let registry = Arc::new(StaticRegistry::new(
        names
            .iter()
            .map(|name| RegisteredRepo::new(*name, root.join(name)))
            .collect(),
    ));
    let dyn_registry: Arc<dyn RepoRegistry> = registry.clone();
    let state = AppState::new(test_config(), dyn_registry);
    state
        .watcher_pool
        .refresh_from(state.registry.as_ref())
        .await?;

    Ok(TestEnv {
        state,
        registry,
        root,
        _tempdir: tempdir,
    })
}

/// The full app served on an ephemeral port.
#[derive(Debug)]
pub struct RunningServer {
    pub addr: SocketAddr,
    pub ws_url: String,
    token: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    /// Stop accepting connections and wait briefly for the serve loop.
    pub async fn shutdown(self) -> Result<()> {
        self.token.cancel();
        match tokio::time::timeout(Duration::from_secs(5), self.handle).await {
            Ok(joined) => joined??,
            Err(_) => tracing::warn!("server did not stop within 5s"),
        }
        Ok(())
    }
}

pub async fn spawn_server(state: AppState) -> Result<RunningServer> {
    let ws_path = state.config().server.ws_path.clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let token = CancellationToken::new();

    let app = create_app(state);
    let shutdown = token.clone().cancelled_owned();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });

    Ok(RunningServer {
        addr,
        ws_url: format!("ws://{addr}{ws_path}"),
        token,
        handle,
    })
}

/// Bare WebSocket peer speaking the wire protocol directly.
#[derive(Debug)]
pub struct WsPeer {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsPeer {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url).await.context("ws connect")?;
        Ok(Self { stream })
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.stream.send(Message::text(text.to_string())).await?;
        Ok(())
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let encoded = message.encode()?;
        self.send_raw(&encoded).await
    }

    /// Next server message, failing after five seconds.
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        self.recv_within(Duration::from_secs(5))
            .await?
            .ok_or_else(|| anyhow!("no server message within 5s"))
    }

    /// Next server message, or `None` when `window` passes quietly.
    pub async fn recv_within(
        &mut self,
        window: Duration,
    ) -> Result<Option<ServerMessage>> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let frame =
                match tokio::time::timeout_at(deadline, self.stream.next()).await {
                    Err(_) => return Ok(None),
                    Ok(None) => return Err(anyhow!("server closed the socket")),
                    Ok(Some(frame)) => frame?,
                };
            match frame {
                Message::Text(text) => {
                    return Ok(Some(ServerMessage::decode(text.as_str())?));
                }
                Message::Binary(bytes) => {
                    return Ok(Some(ServerMessage::decode_slice(&bytes)?));
                }
                Message::Close(_) => {
                    return Err(anyhow!("server closed the socket"));
                }
                _ => continue,
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
