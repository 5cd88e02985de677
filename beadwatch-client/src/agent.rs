//! Reconnecting subscription agent.
//!
//! The agent owns a background task that keeps one session open, replays the
//! desired subscription set on every (re)connection and routes server pushes
//! to local listeners. Subscriptions are client-side state: they survive any
//! number of disconnects until the caller unsubscribes.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use beadwatch_config::ClientConfig;
use beadwatch_model::{
    ChangeEvent, ClientMessage, ErrorPayload, RepoId, RepoSyncEvent,
    ServerMessage,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::error::{ClientError, Result};
use crate::listeners::{ChangeCallback, ListenerCategory, ListenerHandle, ListenerRegistry};
use crate::state::ConnectionState;
use crate::transport::{ClientChannel, Connector, WebSocketConnector};

pub const TRANSPORT_ERROR_CODE: &str = "transport";

#[derive(Debug, Clone, Copy)]
pub struct AgentOptions {
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

impl From<&ClientConfig> for AgentOptions {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            policy: ReconnectPolicy::from(cfg),
            connect_timeout: cfg.connect_timeout(),
        }
    }
}

struct Shared {
    connector: Arc<dyn Connector>,
    options: AgentOptions,
    // Lock order: desired before outbound.
    desired: Mutex<BTreeSet<RepoId>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    confirmed: Mutex<BTreeSet<RepoId>>,
    listeners: ListenerRegistry,
    state: watch::Sender<ConnectionState>,
    retry_count: AtomicU32,
    last_error: Mutex<Option<String>>,
}

enum SessionEnd {
    Cancelled,
    Lost(String),
}

impl Shared {
    fn subscribe(&self, repo_id: RepoId) -> bool {
        let mut desired = self.desired.lock();
        if !desired.insert(repo_id.clone()) {
            return false;
        }
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(ClientMessage::Subscribe(repo_id));
        }
        true
    }

    fn unsubscribe(&self, repo_id: &RepoId) -> bool {
        let mut desired = self.desired.lock();
        if !desired.remove(repo_id) {
            return false;
        }
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(ClientMessage::Unsubscribe(repo_id.clone()));
        }
        self.confirmed.lock().remove(repo_id);
        true
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            debug!(from = %previous, to = %next, "connection state changed");
        }
    }

    fn detach(&self) {
        *self.outbound.lock() = None;
        self.confirmed.lock().clear();
    }

    fn record_failure(&self, reason: String) -> u32 {
        let failures = self.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(attempt = failures, error = %reason, "connection attempt failed");
        *self.last_error.lock() = Some(reason.clone());
        self.set_state(ConnectionState::Error {
            reason: reason.clone(),
        });
        self.listeners.dispatch_error(
            &ErrorPayload::new(reason).with_code(TRANSPORT_ERROR_CODE),
        );
        failures
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let attempt = tokio::select! {
                _ = token.cancelled() => break,
                attempt = tokio::time::timeout(
                    self.options.connect_timeout,
                    self.connector.connect(),
                ) => attempt,
            };

            let failures = match attempt {
                Ok(Ok(channel)) => {
                    self.retry_count.store(0, Ordering::SeqCst);
                    *self.last_error.lock() = None;
                    match self.run_session(channel, &token).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Lost(reason) => {
                            info!(reason = %reason, "connection lost; reconnecting");
                            self.set_state(ConnectionState::Disconnected);
                            0
                        }
                    }
                }
                Ok(Err(err)) => self.record_failure(err.to_string()),
                Err(_) => self.record_failure(
                    ClientError::Timeout(self.options.connect_timeout).to_string(),
                ),
            };

            let delay = self.options.policy.delay_for(failures);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.detach();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn run_session(
        &self,
        channel: ClientChannel,
        token: &CancellationToken,
    ) -> SessionEnd {
        let ClientChannel {
            mut outgoing,
            mut incoming,
        } = channel;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let replayed = {
            let desired = self.desired.lock();
            for repo_id in desired.iter() {
                let _ = tx.send(ClientMessage::Subscribe(repo_id.clone()));
            }
            *self.outbound.lock() = Some(tx);
            desired.len()
        };
        self.set_state(ConnectionState::Connected);
        info!(replayed, "connected");

        let end = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = outgoing.close().await;
                    break SessionEnd::Cancelled;
                }
                Some(message) = rx.recv() => {
                    if let Err(err) = outgoing.send(message).await {
                        break SessionEnd::Lost(err.to_string());
                    }
                }
                frame = incoming.next() => match frame {
                    Some(Ok(message)) => self.handle_server_message(message),
                    Some(Err(err)) => break SessionEnd::Lost(err.to_string()),
                    None => break SessionEnd::Lost("closed by server".to_string()),
                },
            }
        };

        self.detach();
        end
    }

    fn handle_server_message(&self, message: ServerMessage) {
        match &message {
            ServerMessage::Subscribed(ack) => {
                debug!(repo_id = %ack.repo_id, clients = ack.client_count, "subscription confirmed");
                // An ack racing a local unsubscribe must not resurrect it.
                if self.desired.lock().contains(&ack.repo_id) {
                    self.confirmed.lock().insert(ack.repo_id.clone());
                }
            }
            ServerMessage::Unsubscribed(ack) => {
                self.confirmed.lock().remove(&ack.repo_id);
            }
            ServerMessage::Error(payload) => {
                warn!(code = ?payload.code, message = %payload.message, "server reported an error");
            }
            _ => {}
        }
        self.listeners.dispatch(&message);
    }
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Client half of the change feed.
pub struct ClientSyncAgent {
    shared: Arc<Shared>,
    task: Mutex<Option<RunningTask>>,
}

impl fmt::Debug for ClientSyncAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSyncAgent")
            .field("state", &*self.shared.state.borrow())
            .field("desired", &*self.shared.desired.lock())
            .field("retry_count", &self.retry_count())
            .field("running", &self.task.lock().is_some())
            .finish()
    }
}

impl ClientSyncAgent {
    pub fn new(connector: Arc<dyn Connector>, options: AgentOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                options,
                desired: Mutex::new(BTreeSet::new()),
                outbound: Mutex::new(None),
                confirmed: Mutex::new(BTreeSet::new()),
                listeners: ListenerRegistry::new(),
                state,
                retry_count: AtomicU32::new(0),
                last_error: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Agent speaking WebSocket to `cfg.url`.
    pub fn from_config(cfg: &ClientConfig) -> Result<Self> {
        let connector = WebSocketConnector::new(&cfg.url)?;
        Ok(Self::new(Arc::new(connector), AgentOptions::from(cfg)))
    }

    /// Start the background connection task. Calling it while the task is
    /// already running does nothing. Must be called within a Tokio runtime.
    pub fn connect(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }
        let token = CancellationToken::new();
        let handle =
            tokio::spawn(Arc::clone(&self.shared).run(token.clone()));
        *task = Some(RunningTask { token, handle });
    }

    /// Stop the connection task and close the session. The desired
    /// subscription set is kept for the next [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        let running = self.task.lock().take();
        if let Some(RunningTask { token, handle }) = running {
            token.cancel();
            if let Err(err) = handle.await {
                warn!(error = %err, "connection task ended abnormally");
            }
        }
        self.shared.detach();
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Add `repo_id` to the desired set, joining its room right away when
    /// connected. Returns `false` when it was already desired.
    pub fn subscribe(&self, repo_id: impl Into<RepoId>) -> bool {
        self.shared.subscribe(repo_id.into())
    }

    /// Returns `false` when `repo_id` was not desired.
    pub fn unsubscribe(&self, repo_id: &RepoId) -> bool {
        self.shared.unsubscribe(repo_id)
    }

    pub fn is_subscribed_to(&self, repo_id: &RepoId) -> bool {
        self.shared.desired.lock().contains(repo_id)
    }

    pub fn subscriptions(&self) -> Vec<RepoId> {
        self.shared.desired.lock().iter().cloned().collect()
    }

    /// Repositories the server acknowledged during the current session.
    pub fn confirmed_subscriptions(&self) -> Vec<RepoId> {
        self.shared.confirmed.lock().iter().cloned().collect()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// Consecutive failed attempts since the last successful connection.
    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.shared.listeners
    }

    pub fn on_created<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.on_created(callback)
    }

    pub fn on_changed<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.on_changed(callback)
    }

    pub fn on_deleted<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.on_deleted(callback)
    }

    pub fn on_sync<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&RepoSyncEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.on_sync(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ErrorPayload) + Send + Sync + 'static,
    {
        self.shared.listeners.on_error(callback)
    }

    /// Subscribe to one repository and register item callbacks that only see
    /// that repository's events. [`ItemWatch::stop`] undoes both.
    pub fn watch_items(
        &self,
        repo_id: impl Into<RepoId>,
        callbacks: ItemCallbacks,
    ) -> ItemWatch {
        let repo_id = repo_id.into();
        self.shared.subscribe(repo_id.clone());

        let slots = [
            (ListenerCategory::Created, callbacks.on_created),
            (ListenerCategory::Changed, callbacks.on_changed),
            (ListenerCategory::Deleted, callbacks.on_deleted),
        ];
        let handles = slots
            .into_iter()
            .filter_map(|(category, callback)| {
                let callback = callback?;
                let repo = repo_id.clone();
                let filtered: ChangeCallback = Arc::new(move |event: &ChangeEvent| {
                    if event.repo_id() == &repo {
                        callback(event);
                    }
                });
                Some(self.shared.listeners.register_change(category, filtered))
            })
            .collect();

        ItemWatch {
            agent: Arc::downgrade(&self.shared),
            repo_id,
            handles,
        }
    }
}

impl Drop for ClientSyncAgent {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.token.cancel();
        }
    }
}

/// Per-kind item callbacks for [`ClientSyncAgent::watch_items`].
#[derive(Default)]
pub struct ItemCallbacks {
    on_created: Option<ChangeCallback>,
    on_changed: Option<ChangeCallback>,
    on_deleted: Option<ChangeCallback>,
}

impl fmt::Debug for ItemCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemCallbacks")
            .field("on_created", &self.on_created.is_some())
            .field("on_changed", &self.on_changed.is_some())
            .field("on_deleted", &self.on_deleted.is_some())
            .finish()
    }
}

impl ItemCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_created<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_created = Some(Arc::new(callback));
        self
    }

    pub fn on_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_changed = Some(Arc::new(callback));
        self
    }

    pub fn on_deleted<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_deleted = Some(Arc::new(callback));
        self
    }
}

/// Active [`ClientSyncAgent::watch_items`] registration.
pub struct ItemWatch {
    agent: Weak<Shared>,
    repo_id: RepoId,
    handles: Vec<ListenerHandle>,
}

impl fmt::Debug for ItemWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemWatch")
            .field("repo_id", &self.repo_id)
            .field("listeners", &self.handles.len())
            .finish()
    }
}

impl ItemWatch {
    pub fn repo_id(&self) -> &RepoId {
        &self.repo_id
    }

    /// Remove the callbacks and unsubscribe from the repository.
    pub fn stop(self) {
        for handle in &self.handles {
            handle.unregister();
        }
        if let Some(shared) = self.agent.upgrade() {
            shared.unsubscribe(&self.repo_id);
        }
    }
}
