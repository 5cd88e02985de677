//! Filesystem watch pipeline for managed repositories.
//!
//! A thin wrapper around `notify` holding one watcher set per repository.
//! Raw notifications are filtered against the repository's watch targets,
//! coalesced by the [`ChangeDebouncer`] and handed, in order, to a single
//! dispatch task that publishes them through a [`RepoEventSink`].
//!
//! A watcher that fails leaves its repository `Degraded`: it stops producing
//! events, subscribers get a `sync_error`, and the next `refresh` or `watch`
//! call tries again. Other repositories are unaffected.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use beadwatch_config::WatchConfig;
use beadwatch_model::{ChangeKind, RepoId, RepoSyncEvent, ServerMessage};
use dashmap::DashSet;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, RecommendedWatcher, Watcher as _,
};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{debug, info, trace, warn};

pub mod debounce;
pub mod filter;
pub mod targets;

pub use debounce::{ChangeDebouncer, DebounceKey, FinalizedEvent};
pub use filter::is_ignored;
pub use targets::{
    FsProbe, PathProbe, StoreLayout, WatchTarget, resolve_watch_targets,
};

use crate::error::{Result, WatchError};
use crate::registry::{RegisteredRepo, RepoRegistry};
use crate::sink::RepoEventSink;

/// Configuration knobs for watch processing.
#[derive(Clone, Debug)]
pub struct FsWatchConfig {
    /// Quiet window per (repository, path, kind) before an event is emitted.
    pub debounce_window: Duration,
    /// Capacity of the channel between OS callbacks and a repository's pump.
    pub event_channel_capacity: usize,
    pub layout: StoreLayout,
}

impl Default for FsWatchConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(100),
            event_channel_capacity: 1024,
            layout: StoreLayout::default(),
        }
    }
}

impl From<&WatchConfig> for FsWatchConfig {
    fn from(cfg: &WatchConfig) -> Self {
        Self {
            debounce_window: cfg.debounce_window(),
            event_channel_capacity: cfg.event_channel_capacity.max(1),
            layout: StoreLayout::from(&cfg.store),
        }
    }
}

/// Observer hook for surfacing watcher lifecycle and errors.
pub trait FsWatchObserver: Send + Sync {
    fn on_error(&self, repo_id: &RepoId, error: &str);

    fn on_watch_started(&self, _repo_id: &RepoId, _targets: &[WatchTarget]) {}

    fn on_watch_stopped(&self, _repo_id: &RepoId) {}
}

/// No-op observer used when nothing needs to hear about watcher errors
/// beyond the log.
pub struct NoopFsWatchObserver;

impl FsWatchObserver for NoopFsWatchObserver {
    fn on_error(&self, _repo_id: &RepoId, _error: &str) {}
}

impl fmt::Debug for NoopFsWatchObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoopFsWatchObserver")
    }
}

/// Outcome of a single `watch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchStatus {
    Watching { targets: Vec<WatchTarget> },
    /// Neither target exists yet. Nothing is kept; a later refresh retries.
    NoTargets,
    Degraded(String),
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub started: Vec<RepoId>,
    pub stopped: Vec<RepoId>,
    pub degraded: Vec<RepoId>,
}

/// Point-in-time view of one pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoWatchSnapshot {
    pub repo_id: RepoId,
    pub path: PathBuf,
    pub targets: Vec<WatchTarget>,
    /// `None` while watching, otherwise why the watcher stopped.
    pub degraded: Option<String>,
}

impl RepoWatchSnapshot {
    pub fn is_watching(&self) -> bool {
        self.degraded.is_none()
    }
}

type RepoMap = HashMap<RepoId, RepoWatch>;

/// Owns one set of OS watchers per managed repository.
pub struct RepoWatcherPool<O: FsWatchObserver = NoopFsWatchObserver> {
    config: FsWatchConfig,
    observer: Arc<O>,
    probe: Arc<dyn PathProbe>,
    repos: Arc<Mutex<RepoMap>>,
    live: Arc<DashSet<RepoId>>,
    debouncer: Arc<ChangeDebouncer>,
    dispatch_tx: mpsc::UnboundedSender<FinalizedEvent>,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl<O: FsWatchObserver + 'static> fmt::Debug for RepoWatcherPool<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("RepoWatcherPool");
        debug
            .field("config", &self.config)
            .field("observer_type", &std::any::type_name::<O>())
            .field("debouncer", &self.debouncer)
            .field("closed", &self.closed.load(Ordering::Relaxed));

        match self.repos.try_lock() {
            Ok(guard) => {
                let active = guard
                    .values()
                    .filter(|entry| entry.is_active())
                    .count();
                debug
                    .field("repo_count", &guard.len())
                    .field("active_watchers", &active);
            }
            Err(_) => {
                debug.field("repos", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl RepoWatcherPool<NoopFsWatchObserver> {
    pub fn without_observer(
        config: FsWatchConfig,
        sink: Arc<dyn RepoEventSink>,
    ) -> Self {
        Self::new(config, sink, Arc::new(NoopFsWatchObserver))
    }
}

impl<O: FsWatchObserver + 'static> RepoWatcherPool<O> {
    /// Build a pool publishing into `sink`. Spawns the dispatch task, so it
    /// must be called from within a tokio runtime.
    pub fn new(
        config: FsWatchConfig,
        sink: Arc<dyn RepoEventSink>,
        observer: Arc<O>,
    ) -> Self {
        Self::with_probe(config, sink, observer, Arc::new(FsProbe))
    }

    pub fn with_probe(
        config: FsWatchConfig,
        sink: Arc<dyn RepoEventSink>,
        observer: Arc<O>,
        probe: Arc<dyn PathProbe>,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let live = Arc::new(DashSet::new());
        let dispatcher = spawn_dispatcher(dispatch_rx, sink, Arc::clone(&live));
        let debouncer = Arc::new(ChangeDebouncer::new(
            config.debounce_window,
            dispatch_tx.clone(),
        ));

        Self {
            config,
            observer,
            probe,
            repos: Arc::new(Mutex::new(HashMap::new())),
            live,
            debouncer,
            dispatch_tx,
            dispatcher: parking_lot::Mutex::new(Some(dispatcher)),
            next_generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &FsWatchConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(WatchError::PoolClosed)
        } else {
            Ok(())
        }
    }

    /// Start watching `repo_id`, replacing any existing watcher for it.
    pub async fn watch(
        &self,
        repo_id: RepoId,
        repo_path: impl Into<PathBuf>,
    ) -> Result<WatchStatus> {
        self.ensure_open()?;
        let repo_path = repo_path.into();

        let mut guard = self.repos.lock().await;
        self.stop_locked(&mut guard, &repo_id);
        self.start_locked(&mut guard, repo_id, repo_path).await
    }

    /// Stop watching `repo_id`. Returns whether anything was being watched.
    pub async fn unwatch(&self, repo_id: &RepoId) -> Result<bool> {
        self.ensure_open()?;
        let mut guard = self.repos.lock().await;
        Ok(self.stop_locked(&mut guard, repo_id))
    }

    /// Reconcile the pool against the authoritative repository list.
    pub async fn refresh(
        &self,
        current: &[RegisteredRepo],
    ) -> Result<RefreshReport> {
        self.ensure_open()?;

        let mut report = RefreshReport::default();
        let mut guard = self.repos.lock().await;

        let wanted: HashSet<&RepoId> = current
            .iter()
            .filter(|repo| repo.is_valid)
            .map(|repo| &repo.id)
            .collect();

        let mut removed: Vec<RepoId> = guard
            .keys()
            .filter(|id| !wanted.contains(id))
            .cloned()
            .collect();
        removed.sort();
        for repo_id in removed {
            if self.stop_locked(&mut guard, &repo_id) {
                report.stopped.push(repo_id);
            }
        }

        let mut seen = HashSet::new();
        for repo in current.iter().filter(|repo| repo.is_valid) {
            if !seen.insert(&repo.id) {
                continue;
            }

            let needs_start = match guard.get(&repo.id) {
                None => true,
                Some(entry) => {
                    !entry.is_active()
                        || entry.path != repo.path
                        || self.targets_drifted(entry)
                }
            };
            if !needs_start {
                continue;
            }

            self.stop_locked(&mut guard, &repo.id);
            match self
                .start_locked(&mut guard, repo.id.clone(), repo.path.clone())
                .await?
            {
                WatchStatus::Watching { .. } => {
                    report.started.push(repo.id.clone())
                }
                WatchStatus::Degraded(_) => {
                    report.degraded.push(repo.id.clone())
                }
                WatchStatus::NoTargets => {}
            }
        }

        info!(
            started = report.started.len(),
            stopped = report.stopped.len(),
            degraded = report.degraded.len(),
            watched = guard.values().filter(|entry| entry.is_active()).count(),
            "watcher refresh complete"
        );

        Ok(report)
    }

    /// Load the repository list from `registry` and reconcile against it.
    pub async fn refresh_from(
        &self,
        registry: &dyn RepoRegistry,
    ) -> Result<RefreshReport> {
        self.ensure_open()?;
        let repos = registry.repos().await?;
        self.refresh(&repos).await
    }

    /// Repositories with a live watcher, sorted.
    pub async fn watched_repos(&self) -> Vec<RepoId> {
        let guard = self.repos.lock().await;
        let mut ids: Vec<RepoId> = guard
            .iter()
            .filter(|(_, entry)| entry.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every pool entry, watching or degraded, sorted by repository.
    pub async fn snapshot(&self) -> Vec<RepoWatchSnapshot> {
        let guard = self.repos.lock().await;
        let mut entries: Vec<RepoWatchSnapshot> = guard
            .iter()
            .map(|(id, entry)| RepoWatchSnapshot {
                repo_id: id.clone(),
                path: entry.path.clone(),
                targets: entry.targets.clone(),
                degraded: match &entry.state {
                    RepoWatchState::Active { .. } => None,
                    RepoWatchState::Degraded { reason } => Some(reason.clone()),
                },
            })
            .collect();
        entries.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));
        entries
    }

    /// Tear down every watcher, cancel pending timers without firing and stop
    /// the dispatch task. Later calls on the pool fail with `PoolClosed`.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        {
            let mut guard = self.repos.lock().await;
            let mut ids: Vec<RepoId> = guard.keys().cloned().collect();
            ids.sort();
            for repo_id in ids {
                self.stop_locked(&mut guard, &repo_id);
            }
        }

        self.debouncer.shutdown();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            handle.abort();
            let _ = handle.await;
            info!("watcher pool shut down");
        }
    }

    /// Whether the targets on disk differ from the ones being watched. A
    /// vanished item directory or a newly created aggregate file both show up
    /// here.
    fn targets_drifted(&self, entry: &RepoWatch) -> bool {
        let current = resolve_watch_targets(
            &entry.path,
            &self.config.layout,
            self.probe.as_ref(),
        );
        current != entry.targets
    }

    fn stop_locked(&self, guard: &mut RepoMap, repo_id: &RepoId) -> bool {
        let Some(entry) = guard.remove(repo_id) else {
            return false;
        };

        self.live.remove(repo_id);
        let was_active = entry.is_active();
        entry.shutdown();
        let cancelled = self.debouncer.cancel_repo(repo_id);

        self.observer.on_watch_stopped(repo_id);
        info!(
            repo_id = %repo_id,
            was_active,
            cancelled_timers = cancelled,
            "stopped repository watcher"
        );
        true
    }

    async fn start_locked(
        &self,
        guard: &mut RepoMap,
        repo_id: RepoId,
        repo_path: PathBuf,
    ) -> Result<WatchStatus> {
        let targets = resolve_watch_targets(
            &repo_path,
            &self.config.layout,
            self.probe.as_ref(),
        );
        if targets.is_empty() {
            debug!(
                repo_id = %repo_id,
                path = %repo_path.display(),
                "no watch targets present; will retry on refresh"
            );
            return Ok(WatchStatus::NoTargets);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let capacity = self.config.event_channel_capacity.max(1);
        let (tx, rx) = mpsc::channel::<WatchMessage>(capacity);

        let watcher_targets = targets.clone();
        let build_result =
            spawn_blocking(move || init_watchers(&watcher_targets, tx)).await;

        let failure = match build_result {
            Ok(Ok(watchers)) => {
                let pump = spawn_pump(
                    PumpContext {
                        repo_id: repo_id.clone(),
                        generation,
                        targets: targets.clone(),
                        repos: Arc::clone(&self.repos),
                        debouncer: Arc::clone(&self.debouncer),
                        observer: Arc::clone(&self.observer),
                        dispatch_tx: self.dispatch_tx.clone(),
                    },
                    rx,
                );

                guard.insert(
                    repo_id.clone(),
                    RepoWatch {
                        path: repo_path.clone(),
                        targets: targets.clone(),
                        generation,
                        state: RepoWatchState::Active { watchers, pump },
                    },
                );
                self.live.insert(repo_id.clone());
                self.observer.on_watch_started(&repo_id, &targets);

                let labels: Vec<&str> =
                    targets.iter().map(WatchTarget::label).collect();
                info!(
                    repo_id = %repo_id,
                    path = %repo_path.display(),
                    targets = ?labels,
                    "started repository watcher"
                );
                return Ok(WatchStatus::Watching { targets });
            }
            Ok(Err(err)) => err.to_string(),
            Err(join_err) => {
                format!("watcher initialization panicked: {join_err}")
            }
        };

        warn!(
            repo_id = %repo_id,
            path = %repo_path.display(),
            error = %failure,
            "failed to start repository watcher"
        );
        self.observer.on_error(&repo_id, &failure);

        guard.insert(
            repo_id.clone(),
            RepoWatch {
                path: repo_path,
                targets,
                generation,
                state: RepoWatchState::Degraded {
                    reason: failure.clone(),
                },
            },
        );
        self.live.insert(repo_id.clone());
        publish_sync_error(&self.dispatch_tx, &repo_id, &failure);

        Ok(WatchStatus::Degraded(failure))
    }
}

impl<O: FsWatchObserver> Drop for RepoWatcherPool<O> {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

struct RepoWatch {
    path: PathBuf,
    targets: Vec<WatchTarget>,
    generation: u64,
    state: RepoWatchState,
}

enum RepoWatchState {
    Active {
        watchers: Vec<RecommendedWatcher>,
        pump: JoinHandle<()>,
    },
    Degraded {
        reason: String,
    },
}

impl RepoWatch {
    fn is_active(&self) -> bool {
        matches!(self.state, RepoWatchState::Active { .. })
    }

    fn shutdown(self) {
        if let RepoWatchState::Active { watchers, pump } = self.state {
            pump.abort();
            // Dropping the watchers releases the OS handles.
            drop(watchers);
        }
    }
}

impl fmt::Debug for RepoWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("RepoWatch");
        debug
            .field("path", &self.path)
            .field("targets", &self.targets)
            .field("generation", &self.generation);
        match &self.state {
            RepoWatchState::Active { watchers, pump } => debug
                .field("watcher_count", &watchers.len())
                .field("pump_finished", &pump.is_finished()),
            RepoWatchState::Degraded { reason } => {
                debug.field("degraded", reason)
            }
        };
        debug.finish()
    }
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error(message) => f
                .debug_struct("WatchMessage::Error")
                .field("message", message)
                .finish(),
        }
    }
}

struct PumpContext<O> {
    repo_id: RepoId,
    generation: u64,
    targets: Vec<WatchTarget>,
    repos: Arc<Mutex<RepoMap>>,
    debouncer: Arc<ChangeDebouncer>,
    observer: Arc<O>,
    dispatch_tx: mpsc::UnboundedSender<FinalizedEvent>,
}

fn spawn_pump<O: FsWatchObserver + 'static>(
    ctx: PumpContext<O>,
    mut rx: mpsc::Receiver<WatchMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut translator = EventTranslator::new(ctx.targets.clone());
        while let Some(message) = rx.recv().await {
            match message {
                WatchMessage::Event(event) => {
                    if let Some(root) = vanished_root(&ctx.targets, &event) {
                        let reason =
                            format!("watch root removed: {}", root.display());
                        degrade(&ctx, reason).await;
                        break;
                    }

                    let present = existing_paths(&ctx.targets, &event).await;
                    let pairs = translator
                        .translate(&event, |path| present.contains(path));
                    for (kind, path) in pairs {
                        trace!(
                            repo_id = %ctx.repo_id,
                            kind = kind.as_str(),
                            path = %path.display(),
                            "raw change"
                        );
                        ctx.debouncer.notify(kind, &ctx.repo_id, path);
                    }
                }
                WatchMessage::Error(error) => {
                    degrade(&ctx, error).await;
                    break;
                }
            }
        }
    })
}

async fn degrade<O: FsWatchObserver>(ctx: &PumpContext<O>, reason: String) {
    let mut guard = ctx.repos.lock().await;
    let Some(entry) = guard.get_mut(&ctx.repo_id) else {
        return;
    };
    if entry.generation != ctx.generation {
        return;
    }

    let previous = std::mem::replace(
        &mut entry.state,
        RepoWatchState::Degraded {
            reason: reason.clone(),
        },
    );
    // Never abort the pump from inside itself; it exits after this returns.
    if let RepoWatchState::Active { watchers, .. } = previous {
        drop(watchers);
    }
    ctx.debouncer.cancel_repo(&ctx.repo_id);
    drop(guard);

    warn!(
        repo_id = %ctx.repo_id,
        error = %reason,
        "repository watcher failed; marked degraded until next refresh"
    );
    ctx.observer.on_error(&ctx.repo_id, &reason);
    publish_sync_error(&ctx.dispatch_tx, &ctx.repo_id, &reason);
}

fn publish_sync_error(
    dispatch_tx: &mpsc::UnboundedSender<FinalizedEvent>,
    repo_id: &RepoId,
    reason: &str,
) {
    let finalized = FinalizedEvent {
        repo_id: repo_id.clone(),
        message: ServerMessage::Sync(RepoSyncEvent::error(
            repo_id.clone(),
            reason,
        )),
    };
    if dispatch_tx.send(finalized).is_err() {
        trace!(repo_id = %repo_id, "dispatch channel closed; dropping sync error");
    }
}

fn spawn_dispatcher(
    mut rx: mpsc::UnboundedReceiver<FinalizedEvent>,
    sink: Arc<dyn RepoEventSink>,
    live: Arc<DashSet<RepoId>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(FinalizedEvent { repo_id, message }) = rx.recv().await
        {
            if !live.contains(&repo_id) {
                trace!(
                    repo_id = %repo_id,
                    event = message.event_name(),
                    "repository no longer watched; dropping event"
                );
                continue;
            }

            let event = message.event_name();
            let delivered = sink.publish(&repo_id, message);
            debug!(repo_id = %repo_id, event, delivered, "published");
        }
    })
}

/// The watch root named by a removal or move-away event, if any. The OS
/// watch on that root is gone once this fires.
fn vanished_root<'a>(
    targets: &'a [WatchTarget],
    event: &Event,
) -> Option<&'a Path> {
    let vanishing = matches!(
        event.kind,
        EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::From))
    );
    if !vanishing {
        return None;
    }
    targets
        .iter()
        .map(WatchTarget::watch_root)
        .find(|root| {
            event.paths.iter().any(|path| path.as_path() == *root)
        })
}

/// For renames whose direction the backend could not tell, which of the
/// accepted paths exist right now. Stats go through `tokio::fs` so the pump
/// never blocks a runtime worker.
async fn existing_paths(
    targets: &[WatchTarget],
    event: &Event,
) -> HashSet<PathBuf> {
    let mut present = HashSet::new();
    if !is_undirected_rename(&event.kind) {
        return present;
    }
    for path in &event.paths {
        if !targets.iter().any(|target| target.accepts(path)) {
            continue;
        }
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            present.insert(path.clone());
        }
    }
    present
}

fn is_undirected_rename(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Name(
            RenameMode::Any | RenameMode::Other
        ))
    )
}

/// Per-pump translation state.
///
/// Remembers whether the aggregate file is known to exist, so that a store
/// rewritten by replace-and-rename reads as a modification rather than a
/// fresh creation.
struct EventTranslator {
    targets: Vec<WatchTarget>,
    aggregate_present: bool,
}

impl EventTranslator {
    fn new(targets: Vec<WatchTarget>) -> Self {
        // Resolution only yields an aggregate target for an existing file.
        let aggregate_present = targets
            .iter()
            .any(|target| matches!(target, WatchTarget::Aggregate { .. }));
        Self {
            targets,
            aggregate_present,
        }
    }

    fn translate(
        &mut self,
        event: &Event,
        exists: impl Fn(&Path) -> bool,
    ) -> Vec<(ChangeKind, PathBuf)> {
        let mut pairs = translate_event(&self.targets, event, exists);
        for (kind, path) in &mut pairs {
            if self.is_aggregate(path) {
                *kind = self.settle_aggregate(*kind);
            }
        }
        pairs
    }

    fn is_aggregate(&self, path: &Path) -> bool {
        self.targets.iter().any(|target| {
            matches!(target, WatchTarget::Aggregate { file } if file == path)
        })
    }

    fn settle_aggregate(&mut self, kind: ChangeKind) -> ChangeKind {
        let settled = match kind {
            ChangeKind::Created if self.aggregate_present => {
                ChangeKind::Modified
            }
            other => other,
        };
        self.aggregate_present = settled != ChangeKind::Deleted;
        settled
    }
}

/// Map one raw notification onto zero or more `(kind, path)` pairs that fall
/// inside `targets`. `exists` decides the side of an undirected rename.
fn translate_event(
    targets: &[WatchTarget],
    event: &Event,
    exists: impl Fn(&Path) -> bool,
) -> Vec<(ChangeKind, PathBuf)> {
    let raw: Vec<(ChangeKind, &PathBuf)> = match &event.kind {
        EventKind::Create(_) => tag_all(ChangeKind::Created, &event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            tag_all(ChangeKind::Created, &event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            tag_all(ChangeKind::Deleted, &event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut pairs = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                pairs.push((ChangeKind::Deleted, from));
            }
            if let Some(to) = event.paths.get(1) {
                pairs.push((ChangeKind::Created, to));
            }
            pairs
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                let kind = if exists(path) {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                (kind, path)
            })
            .collect(),
        EventKind::Modify(_) => tag_all(ChangeKind::Modified, &event.paths),
        EventKind::Remove(_) => tag_all(ChangeKind::Deleted, &event.paths),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    };

    raw.into_iter()
        .filter(|(_, path)| targets.iter().any(|target| target.accepts(path)))
        .map(|(kind, path)| (kind, path.clone()))
        .collect()
}

fn tag_all(kind: ChangeKind, paths: &[PathBuf]) -> Vec<(ChangeKind, &PathBuf)> {
    paths.iter().map(|path| (kind, path)).collect()
}

fn init_watchers(
    targets: &[WatchTarget],
    tx: mpsc::Sender<WatchMessage>,
) -> Result<Vec<RecommendedWatcher>> {
    let mut watchers = Vec::with_capacity(targets.len());
    for target in targets {
        let root: PathBuf = target.watch_root().to_path_buf();
        let root_for_log = root.clone();
        let tx_event = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Err(err) =
                        tx_event.blocking_send(WatchMessage::Event(event))
                    {
                        trace!(
                            "fs_watch channel send failed for {}: {}",
                            root_for_log.display(),
                            err
                        );
                    }
                }
                Err(err) => {
                    let _ = tx_event.blocking_send(WatchMessage::Error(
                        err.to_string(),
                    ));
                }
            },
            NotifyConfig::default(),
        )?;

        watcher
            .watch(&root, target.recursive_mode())
            .map_err(|source| watch_path_error(&root, source))?;

        watchers.push(watcher);
    }

    Ok(watchers)
}

fn watch_path_error(path: &Path, source: notify::Error) -> WatchError {
    WatchError::WatchPath {
        path: path.to_path_buf(),
        source,
    }
}
