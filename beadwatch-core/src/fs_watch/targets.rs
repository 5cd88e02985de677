//! Resolution of which paths inside a repository carry item data.

use std::path::{Path, PathBuf};

use beadwatch_config::StoreLayoutConfig;
use notify::RecursiveMode;

use super::filter::is_ignored;

/// Existence checks used while resolving targets. Injected so resolution can
/// be exercised without touching the disk.
pub trait PathProbe: Send + Sync {
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
}

/// Probe backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl PathProbe for FsProbe {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// Location of the item store relative to a repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub store_dir: PathBuf,
    pub aggregate_file: PathBuf,
    pub item_dir: PathBuf,
    pub item_extension: String,
}

impl StoreLayout {
    pub fn aggregate_path(&self, repo_path: &Path) -> PathBuf {
        repo_path.join(&self.store_dir).join(&self.aggregate_file)
    }

    pub fn item_dir_path(&self, repo_path: &Path) -> PathBuf {
        repo_path.join(&self.store_dir).join(&self.item_dir)
    }
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self::from(&StoreLayoutConfig::default())
    }
}

impl From<&StoreLayoutConfig> for StoreLayout {
    fn from(cfg: &StoreLayoutConfig) -> Self {
        Self {
            store_dir: PathBuf::from(&cfg.store_dir),
            aggregate_file: PathBuf::from(&cfg.aggregate_file),
            item_dir: PathBuf::from(&cfg.item_dir),
            item_extension: cfg.item_extension.trim_start_matches('.').to_string(),
        }
    }
}

/// A single watchable source of item changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// Line-oriented file holding every item.
    Aggregate { file: PathBuf },
    /// Legacy directory with one file per item.
    ItemDirectory { dir: PathBuf, extension: String },
}

impl WatchTarget {
    /// Directory handed to the OS watcher. The aggregate file is watched via
    /// its parent so that atomic replace-by-rename is still observed.
    pub fn watch_root(&self) -> &Path {
        match self {
            WatchTarget::Aggregate { file } => {
                file.parent().unwrap_or_else(|| Path::new("/"))
            }
            WatchTarget::ItemDirectory { dir, .. } => dir,
        }
    }

    pub fn recursive_mode(&self) -> RecursiveMode {
        RecursiveMode::NonRecursive
    }

    /// Whether a reported path belongs to this target.
    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            WatchTarget::Aggregate { file } => path == file,
            WatchTarget::ItemDirectory { dir, extension } => {
                let Ok(relative) = path.strip_prefix(dir) else {
                    return false;
                };
                if relative.components().count() != 1 || is_ignored(relative) {
                    return false;
                }
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == extension)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WatchTarget::Aggregate { .. } => "aggregate",
            WatchTarget::ItemDirectory { .. } => "item_directory",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            WatchTarget::Aggregate { file } => file,
            WatchTarget::ItemDirectory { dir, .. } => dir,
        }
    }
}

/// Targets that currently exist for `repo_path`. Either, both or neither may
/// be present; an empty result is not an error.
pub fn resolve_watch_targets(
    repo_path: &Path,
    layout: &StoreLayout,
    probe: &dyn PathProbe,
) -> Vec<WatchTarget> {
    let mut targets = Vec::with_capacity(2);

    let aggregate = layout.aggregate_path(repo_path);
    if probe.is_file(&aggregate) {
        targets.push(WatchTarget::Aggregate { file: aggregate });
    }

    let item_dir = layout.item_dir_path(repo_path);
    if probe.is_dir(&item_dir) {
        targets.push(WatchTarget::ItemDirectory {
            dir: item_dir,
            extension: layout.item_extension.clone(),
        });
    }

    targets
}
