use beadwatch_core::{FsWatchObserver, WatchTarget};
use beadwatch_model::RepoId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;

/// Per-repository watcher error tally surfaced on the status route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchErrorRecord {
    pub count: u64,
    pub last_error: String,
    pub last_error_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct WatchHealth {
    errors: DashMap<RepoId, WatchErrorRecord>,
}

impl fmt::Debug for WatchHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHealth")
            .field("repos_with_errors", &self.errors.len())
            .finish()
    }
}

impl WatchHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors_for(&self, repo_id: &RepoId) -> Option<WatchErrorRecord> {
        self.errors.get(repo_id).map(|record| record.clone())
    }
}

impl FsWatchObserver for WatchHealth {
    fn on_error(&self, repo_id: &RepoId, error: &str) {
        let now = Utc::now();
        self.errors
            .entry(repo_id.clone())
            .and_modify(|record| {
                record.count += 1;
                record.last_error = error.to_string();
                record.last_error_at = now;
            })
            .or_insert_with(|| WatchErrorRecord {
                count: 1,
                last_error: error.to_string(),
                last_error_at: now,
            });
    }

    fn on_watch_started(&self, repo_id: &RepoId, _targets: &[WatchTarget]) {
        // A fresh watcher starts with a clean slate.
        self.errors.remove(repo_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_errors_until_restart() {
        let health = WatchHealth::new();
        let repo = RepoId::from("r1");
        health.on_error(&repo, "first");
        health.on_error(&repo, "second");

        let record = health.errors_for(&repo).unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.last_error, "second");

        health.on_watch_started(&repo, &[]);
        assert!(health.errors_for(&repo).is_none());
    }
}
