use beadwatch_model::{RepoId, ServerMessage};

/// Destination for finalized repository events.
///
/// The watcher pool cannot be constructed without one, so there is no window
/// in which events are produced with nowhere to go.
pub trait RepoEventSink: Send + Sync {
    /// Deliver `message` to every subscriber of `repo_id`, returning how many
    /// subscribers it was handed to. A repository without subscribers is not
    /// an error.
    fn publish(&self, repo_id: &RepoId, message: ServerMessage) -> usize;
}
