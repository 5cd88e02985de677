//! Trailing-edge coalescing of raw filesystem notifications.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use beadwatch_model::{ChangeEvent, ChangeKind, RepoId, ServerMessage};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::classify::classify;

/// Structured debounce key. Each distinct key owns at most one timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub repo_id: RepoId,
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// A message ready for the single dispatch point.
#[derive(Debug, Clone)]
pub struct FinalizedEvent {
    pub repo_id: RepoId,
    pub message: ServerMessage,
}

struct PendingFire {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Collapses bursts of notifications per [`DebounceKey`] into one
/// [`ChangeEvent`] emitted once the key has been quiet for the window.
pub struct ChangeDebouncer {
    window: Duration,
    pending: Arc<DashMap<DebounceKey, PendingFire>>,
    output: mpsc::UnboundedSender<FinalizedEvent>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl fmt::Debug for ChangeDebouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeDebouncer")
            .field("window", &self.window)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ChangeDebouncer {
    pub fn new(
        window: Duration,
        output: mpsc::UnboundedSender<FinalizedEvent>,
    ) -> Self {
        Self {
            window,
            pending: Arc::new(DashMap::new()),
            output,
            next_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a notification, restarting the key's quiet window. Must be
    /// called from within a tokio runtime.
    pub fn notify(&self, kind: ChangeKind, repo_id: &RepoId, path: PathBuf) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let key = DebounceKey {
            repo_id: repo_id.clone(),
            path,
            kind,
        };
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // The entry guard is held while the timer is spawned, so the timer
        // can never observe the map before its own registration lands.
        match self.pending.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let handle = self.spawn_fire(key, generation);
                let previous =
                    occupied.insert(PendingFire { generation, handle });
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                let handle = self.spawn_fire(key, generation);
                vacant.insert(PendingFire { generation, handle });
            }
        }
    }

    fn spawn_fire(&self, key: DebounceKey, generation: u64) -> JoinHandle<()> {
        let window = self.window;
        let pending = Arc::clone(&self.pending);
        let output = self.output.clone();

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let Entry::Occupied(entry) = pending.entry(key) else {
                return;
            };
            if entry.get().generation != generation {
                return;
            }

            let key = entry.key();
            let event = ChangeEvent::new(
                key.kind,
                key.repo_id.clone(),
                classify(&key.path).item_id,
                key.path.clone(),
                Utc::now(),
            );
            let finalized = FinalizedEvent {
                repo_id: key.repo_id.clone(),
                message: ServerMessage::for_change(event),
            };
            if output.send(finalized).is_err() {
                tracing::trace!(
                    repo_id = %key.repo_id,
                    "dispatch channel closed; dropping change"
                );
            }
            entry.remove();
        })
    }

    /// Cancel every pending timer belonging to `repo_id` without firing.
    pub fn cancel_repo(&self, repo_id: &RepoId) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|key, fire| {
            if &key.repo_id == repo_id {
                fire.handle.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cancel all timers without firing and refuse further notifications.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.pending.retain(|_, fire| {
            fire.handle.abort();
            false
        });
    }
}

impl Drop for ChangeDebouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    const WINDOW: Duration = Duration::from_millis(100);

    fn debouncer() -> (ChangeDebouncer, mpsc::UnboundedReceiver<FinalizedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChangeDebouncer::new(WINDOW, tx), rx)
    }

    fn change(message: &ServerMessage) -> &ChangeEvent {
        match message {
            ServerMessage::Changed(event)
            | ServerMessage::Created(event)
            | ServerMessage::Deleted(event) => event,
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_one_event() {
        let (debouncer, mut rx) = debouncer();
        let repo = RepoId::from("r1");
        let path = PathBuf::from("/r1/.beads/issues/PROJ-9.md");

        for _ in 0..5 {
            debouncer.notify(ChangeKind::Modified, &repo, path.clone());
            sleep(Duration::from_millis(20)).await;
        }

        let finalized = rx.recv().await.unwrap();
        assert_eq!(finalized.repo_id, repo);
        assert_eq!(finalized.message.event_name(), "issue:changed");
        let event = change(&finalized.message);
        assert_eq!(event.item_id().map(|id| id.as_str()), Some("PROJ-9"));
        assert_eq!(event.path(), path.as_path());

        sleep(WINDOW * 5).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_notification_restarts_the_window() {
        let (debouncer, mut rx) = debouncer();
        let repo = RepoId::from("r1");
        let path = PathBuf::from("/r1/.beads/issues.jsonl");

        debouncer.notify(ChangeKind::Modified, &repo, path.clone());
        sleep(Duration::from_millis(80)).await;
        debouncer.notify(ChangeKind::Modified, &repo, path.clone());
        sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());

        let finalized = timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("event after quiet window")
            .unwrap();
        assert!(change(&finalized.message).item_id().is_none());
    }

    #[tokio::test]
    async fn timestamp_marks_the_end_of_the_quiet_window() {
        let window = Duration::from_millis(50);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let debouncer = ChangeDebouncer::new(window, tx);
        let repo = RepoId::from("r1");
        let path = PathBuf::from("/r1/.beads/issues/PROJ-2.md");

        debouncer.notify(ChangeKind::Modified, &repo, path.clone());
        sleep(Duration::from_millis(20)).await;
        let before = Utc::now();
        debouncer.notify(ChangeKind::Modified, &repo, path);

        let finalized = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event after quiet window")
            .unwrap();
        let window = chrono::Duration::from_std(window).unwrap();
        let stamped = change(&finalized.message).timestamp();
        assert!(
            stamped >= before + window,
            "timestamp {stamped} precedes window end {}",
            before + window
        );
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_kinds_and_paths_fire_independently() {
        let (debouncer, mut rx) = debouncer();
        let repo = RepoId::from("r1");

        debouncer.notify(ChangeKind::Created, &repo, "/r1/a.md".into());
        debouncer.notify(ChangeKind::Modified, &repo, "/r1/a.md".into());
        debouncer.notify(ChangeKind::Modified, &repo, "/r1/b.md".into());

        let mut names = Vec::new();
        for _ in 0..3 {
            names.push(rx.recv().await.unwrap().message.event_name());
        }
        names.sort_unstable();
        assert_eq!(names, vec!["issue:changed", "issue:changed", "issue:created"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_repo_suppresses_only_that_repo() {
        let (debouncer, mut rx) = debouncer();
        let gone = RepoId::from("gone");
        let kept = RepoId::from("kept");

        debouncer.notify(ChangeKind::Modified, &gone, "/gone/x.md".into());
        debouncer.notify(ChangeKind::Modified, &kept, "/kept/x.md".into());
        assert_eq!(debouncer.cancel_repo(&gone), 1);

        let finalized = rx.recv().await.unwrap();
        assert_eq!(finalized.repo_id, kept);
        sleep(WINDOW * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_without_firing() {
        let (debouncer, mut rx) = debouncer();
        let repo = RepoId::from("r1");
        debouncer.notify(ChangeKind::Deleted, &repo, "/r1/x.md".into());
        debouncer.shutdown();
        debouncer.notify(ChangeKind::Deleted, &repo, "/r1/y.md".into());

        sleep(WINDOW * 3).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(debouncer.pending_count(), 0);
    }
}
