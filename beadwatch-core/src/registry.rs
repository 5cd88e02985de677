//! Read-only view of the repositories the watcher should track.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use beadwatch_model::RepoId;
use serde::Deserialize;

use crate::error::{Result, WatchError};

/// One managed repository as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredRepo {
    pub id: RepoId,
    pub path: PathBuf,
    #[serde(default = "default_valid")]
    pub is_valid: bool,
}

fn default_valid() -> bool {
    true
}

impl RegisteredRepo {
    pub fn new(id: impl Into<RepoId>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            is_valid: true,
        }
    }

    pub fn invalid(mut self) -> Self {
        self.is_valid = false;
        self
    }
}

#[async_trait]
pub trait RepoRegistry: Send + Sync {
    async fn repos(&self) -> Result<Vec<RegisteredRepo>>;
}

#[derive(Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    repos: Vec<RegisteredRepo>,
}

/// Registry backed by the desktop app's JSON config document. Fields other
/// than `repos` are ignored; a missing file lists no repositories.
#[derive(Debug, Clone)]
pub struct JsonFileRegistry {
    path: PathBuf,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RepoRegistry for JsonFileRegistry {
    async fn repos(&self) -> Result<Vec<RegisteredRepo>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(
                    path = %self.path.display(),
                    "repository registry not found; treating as empty"
                );
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(WatchError::Registry(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    err
                )));
            }
        };

        let document: RegistryDocument = serde_json::from_str(&contents)?;
        Ok(document.repos)
    }
}

/// Fixed in-memory registry.
#[derive(Default)]
pub struct StaticRegistry {
    repos: parking_lot::RwLock<Vec<RegisteredRepo>>,
}

impl StaticRegistry {
    pub fn new(repos: Vec<RegisteredRepo>) -> Self {
        Self {
            repos: parking_lot::RwLock::new(repos),
        }
    }

    pub fn replace(&self, repos: Vec<RegisteredRepo>) {
        *self.repos.write() = repos;
    }
}

impl fmt::Debug for StaticRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticRegistry")
            .field("repo_count", &self.repos.read().len())
            .finish()
    }
}

#[async_trait]
impl RepoRegistry for StaticRegistry {
    async fn repos(&self) -> Result<Vec<RegisteredRepo>> {
        Ok(self.repos.read().clone())
    }
}
