use axum::{Json, extract::State};
use beadwatch_core::{RefreshReport, RepoWatchSnapshot, WatchTarget};
use beadwatch_model::RepoId;
use serde::Serialize;
use serde_json::{Value, json};

use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub repos: Vec<RepoStatus>,
    pub rooms: Vec<RoomStatus>,
    pub connections: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub repo_id: RepoId,
    pub path: String,
    pub status: &'static str,
    pub targets: Vec<TargetStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
    pub error_count: u64,
}

#[derive(Debug, Serialize)]
pub struct TargetStatus {
    pub kind: &'static str,
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub repo_id: RepoId,
    pub client_count: usize,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub started: Vec<RepoId>,
    pub stopped: Vec<RepoId>,
    pub degraded: Vec<RepoId>,
}

impl From<RefreshReport> for RefreshResponse {
    fn from(report: RefreshReport) -> Self {
        Self {
            started: report.started,
            stopped: report.stopped,
            degraded: report.degraded,
        }
    }
}

fn target_status(target: &WatchTarget) -> TargetStatus {
    TargetStatus {
        kind: target.label(),
        path: target.path().display().to_string(),
    }
}

fn repo_status(state: &AppState, snapshot: RepoWatchSnapshot) -> RepoStatus {
    let error_count = state
        .watch_health
        .errors_for(&snapshot.repo_id)
        .map_or(0, |record| record.count);

    RepoStatus {
        status: if snapshot.is_watching() {
            "watching"
        } else {
            "degraded"
        },
        path: snapshot.path.display().to_string(),
        targets: snapshot.targets.iter().map(target_status).collect(),
        degraded_reason: snapshot.degraded,
        error_count,
        repo_id: snapshot.repo_id,
    }
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Current watchers, rooms and connection count.
pub async fn list_watchers_handler(
    State(state): State<AppState>,
) -> Json<WatcherStatus> {
    let repos = state
        .watcher_pool
        .snapshot()
        .await
        .into_iter()
        .map(|snapshot| repo_status(&state, snapshot))
        .collect();

    let rooms = state
        .websocket_manager
        .rooms()
        .into_iter()
        .map(|room| RoomStatus {
            repo_id: room.repo_id,
            client_count: room.client_count,
        })
        .collect();

    Json(WatcherStatus {
        repos,
        rooms,
        connections: state.websocket_manager.connection_count(),
    })
}

/// Reload the registry and reconcile the watcher pool against it.
pub async fn refresh_watchers_handler(
    State(state): State<AppState>,
) -> AppResult<Json<RefreshResponse>> {
    let report = state
        .watcher_pool
        .refresh_from(state.registry.as_ref())
        .await?;
    Ok(Json(report.into()))
}
