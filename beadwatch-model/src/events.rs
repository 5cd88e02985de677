use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ids::{ItemId, RepoId};

/// Semantic kind of a filesystem change after coalescing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        }
    }
}

/// One logical change to a repository's item store.
///
/// Built once when a debounce window closes and never mutated afterwards;
/// accessors only hand out shared references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    kind: ChangeKind,
    repo_id: RepoId,
    #[serde(rename = "issueId", default, skip_serializing_if = "Option::is_none")]
    item_id: Option<ItemId>,
    #[serde(rename = "filePath")]
    path: PathBuf,
    timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        kind: ChangeKind,
        repo_id: RepoId,
        item_id: Option<ItemId>,
        path: PathBuf,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            repo_id,
            item_id,
            path,
            timestamp,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn repo_id(&self) -> &RepoId {
        &self.repo_id
    }

    pub fn item_id(&self) -> Option<&ItemId> {
        self.item_id.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Phase reported by a `repo:sync` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    SyncStart,
    SyncComplete,
    SyncError,
}

/// Repository-level status notice, delivered to the repository's room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSyncEvent {
    pub repo_id: RepoId,
    #[serde(rename = "type")]
    pub kind: SyncKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepoSyncEvent {
    pub fn error(repo_id: RepoId, error: impl Into<String>) -> Self {
        Self {
            repo_id,
            kind: SyncKind::SyncError,
            issue_count: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_uses_camel_case_wire_names() {
        let event = ChangeEvent::new(
            ChangeKind::Modified,
            RepoId::from("alpha-YWJj"),
            Some(ItemId::from("PROJ-7")),
            PathBuf::from("/repo/.beads/issues/PROJ-7.md"),
            DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "modified");
        assert_eq!(value["repoId"], "alpha-YWJj");
        assert_eq!(value["issueId"], "PROJ-7");
        assert_eq!(value["filePath"], "/repo/.beads/issues/PROJ-7.md");
        assert_eq!(value["timestamp"], "2026-01-02T03:04:05Z");
    }

    #[test]
    fn absent_item_id_is_omitted() {
        let event = ChangeEvent::new(
            ChangeKind::Deleted,
            RepoId::from("r"),
            None,
            PathBuf::from("/repo/.beads/issues.jsonl"),
            Utc::now(),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("issueId").is_none());

        let back: ChangeEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.item_id(), None);
    }
}
