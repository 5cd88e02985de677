use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::infra::app_state::AppState;

/// Periodically reconcile the watcher pool with the repository registry so
/// added, removed and revalidated repositories are picked up, and degraded
/// watchers get another chance.
pub fn spawn_periodic_refresh(
    state: AppState,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already refreshed.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match state
                .watcher_pool
                .refresh_from(state.registry.as_ref())
                .await
            {
                Ok(report) => debug!(
                    started = report.started.len(),
                    stopped = report.stopped.len(),
                    degraded = report.degraded.len(),
                    "periodic watcher refresh"
                ),
                Err(beadwatch_core::WatchError::PoolClosed) => break,
                Err(err) => {
                    warn!(error = %err, "periodic watcher refresh failed")
                }
            }
        }
        debug!("periodic refresh stopped");
    })
}
