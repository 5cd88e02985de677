use crate::infra::websocket::connection::{Connection, Delivery};
use crate::infra::websocket::messages;
use beadwatch_core::RepoEventSink;
use beadwatch_model::{RepoId, ServerMessage};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Room membership and live connections, kept behind one lock so a join,
/// leave or disconnect can never leave the two views disagreeing.
#[derive(Default)]
struct Registry {
    connections: HashMap<Uuid, ConnectionEntry>,
    rooms: HashMap<RepoId, HashSet<Uuid>>,
}

struct ConnectionEntry {
    connection: Arc<Connection>,
    rooms: HashSet<RepoId>,
}

impl Registry {
    fn room_size(&self, repo_id: &RepoId) -> usize {
        self.rooms.get(repo_id).map_or(0, HashSet::len)
    }

    fn remove_member(&mut self, repo_id: &RepoId, conn_id: Uuid) -> bool {
        let Some(members) = self.rooms.get_mut(repo_id) else {
            return false;
        };
        let removed = members.remove(&conn_id);
        if members.is_empty() {
            self.rooms.remove(repo_id);
        }
        removed
    }
}

/// Subscription rooms keyed by repository, plus the connection registry.
#[derive(Default)]
pub struct ConnectionManager {
    inner: Mutex<Registry>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ConnectionManager");
        match self.inner.try_lock() {
            Some(guard) => debug
                .field("connection_count", &guard.connections.len())
                .field("room_count", &guard.rooms.len()),
            None => debug.field("registry", &"<locked>"),
        };
        debug.finish()
    }
}

/// Room size snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub repo_id: RepoId,
    pub client_count: usize,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection
    pub fn add_connection(&self, connection: Arc<Connection>) {
        let mut guard = self.inner.lock();
        guard.connections.insert(
            connection.id,
            ConnectionEntry {
                connection,
                rooms: HashSet::new(),
            },
        );
    }

    /// Add a connection to a repository's room. Joining twice is harmless.
    /// Returns the room size afterwards.
    pub fn join(&self, conn_id: Uuid, repo_id: &RepoId) -> usize {
        let mut guard = self.inner.lock();
        let Some(entry) = guard.connections.get_mut(&conn_id) else {
            tracing::warn!(
                conn_id = %conn_id,
                repo_id = %repo_id,
                "join for unknown connection ignored"
            );
            return guard.room_size(repo_id);
        };
        entry.rooms.insert(repo_id.clone());
        guard
            .rooms
            .entry(repo_id.clone())
            .or_default()
            .insert(conn_id);

        let size = guard.room_size(repo_id);
        tracing::info!(
            conn_id = %conn_id,
            repo_id = %repo_id,
            room_size = size,
            "client joined room"
        );
        size
    }

    /// Remove a connection from a room. Returns whether it was a member.
    pub fn leave(&self, conn_id: Uuid, repo_id: &RepoId) -> bool {
        let mut guard = self.inner.lock();
        if let Some(entry) = guard.connections.get_mut(&conn_id) {
            entry.rooms.remove(repo_id);
        }
        let removed = guard.remove_member(repo_id, conn_id);

        if removed {
            tracing::info!(
                conn_id = %conn_id,
                repo_id = %repo_id,
                room_size = guard.room_size(repo_id),
                "client left room"
            );
        }
        removed
    }

    /// Remove a connection and every room membership it held. Returns the
    /// rooms it was in.
    pub fn on_disconnect(&self, conn_id: Uuid) -> Vec<RepoId> {
        let mut guard = self.inner.lock();
        let Some(entry) = guard.connections.remove(&conn_id) else {
            return Vec::new();
        };

        let mut left: Vec<RepoId> = entry.rooms.into_iter().collect();
        left.sort();
        for repo_id in &left {
            guard.remove_member(repo_id, conn_id);
            tracing::debug!(
                conn_id = %conn_id,
                repo_id = %repo_id,
                room_size = guard.room_size(repo_id),
                "disconnect removed client from room"
            );
        }
        left
    }

    /// Deliver `message` to every member of the repository's room.
    ///
    /// The registry lock is held for the whole enqueue loop, so publishes for
    /// a room are observed by every member in the order they were made.
    /// Enqueueing never waits: a member whose queue is full misses this
    /// message.
    pub fn publish(&self, repo_id: &RepoId, message: &ServerMessage) -> usize {
        let frame = match messages::server_to_websocket(message) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(
                    repo_id = %repo_id,
                    error = %err,
                    "failed to encode broadcast"
                );
                return 0;
            }
        };

        let guard = self.inner.lock();
        let Some(members) = guard.rooms.get(repo_id) else {
            return 0;
        };

        let mut delivered = 0;
        for conn_id in members {
            let Some(entry) = guard.connections.get(conn_id) else {
                continue;
            };
            match entry.connection.try_send_frame(frame.clone()) {
                Delivery::Queued => delivered += 1,
                Delivery::Full => tracing::warn!(
                    conn_id = %conn_id,
                    repo_id = %repo_id,
                    event = message.event_name(),
                    "subscriber queue full; dropping message"
                ),
                Delivery::Closed => tracing::trace!(
                    conn_id = %conn_id,
                    "subscriber already closed"
                ),
            }
        }

        tracing::debug!(
            repo_id = %repo_id,
            event = message.event_name(),
            room_size = members.len(),
            delivered,
            "broadcast to room"
        );
        delivered
    }

    pub fn room_size(&self, repo_id: &RepoId) -> usize {
        self.inner.lock().room_size(repo_id)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn rooms(&self) -> Vec<RoomSummary> {
        let guard = self.inner.lock();
        let mut rooms: Vec<RoomSummary> = guard
            .rooms
            .iter()
            .map(|(repo_id, members)| RoomSummary {
                repo_id: repo_id.clone(),
                client_count: members.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));
        rooms
    }
}

impl RepoEventSink for ConnectionManager {
    fn publish(&self, repo_id: &RepoId, message: ServerMessage) -> usize {
        ConnectionManager::publish(self, repo_id, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use beadwatch_model::{ErrorPayload, RepoSyncEvent};
    use tokio::sync::mpsc;

    fn connect(
        manager: &ConnectionManager,
        capacity: usize,
    ) -> (Uuid, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let connection = Arc::new(Connection::new(tx));
        let id = connection.id;
        manager.add_connection(connection);
        (id, rx)
    }

    fn sample(repo: &str) -> ServerMessage {
        ServerMessage::Sync(RepoSyncEvent::error(RepoId::from(repo), "boom"))
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            out.push(text.as_str().to_string());
        }
        out
    }

    #[test]
    fn join_is_idempotent() {
        let manager = ConnectionManager::new();
        let (a, _rx) = connect(&manager, 8);
        let repo = RepoId::from("r1");

        assert_eq!(manager.join(a, &repo), 1);
        assert_eq!(manager.join(a, &repo), 1);
        assert_eq!(manager.room_size(&repo), 1);
    }

    #[test]
    fn rooms_are_isolated() {
        let manager = ConnectionManager::new();
        let (a, mut rx_a) = connect(&manager, 8);
        let (b, mut rx_b) = connect(&manager, 8);
        manager.join(a, &RepoId::from("r1"));
        manager.join(b, &RepoId::from("r2"));

        assert_eq!(manager.publish(&RepoId::from("r1"), &sample("r1")), 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn empty_room_publish_is_silent() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.publish(&RepoId::from("nobody"), &sample("nobody")), 0);
    }

    #[test]
    fn leave_and_disconnect_clean_up_rooms() {
        let manager = ConnectionManager::new();
        let (a, _rx_a) = connect(&manager, 8);
        let (b, _rx_b) = connect(&manager, 8);
        let r1 = RepoId::from("r1");
        let r2 = RepoId::from("r2");
        manager.join(a, &r1);
        manager.join(a, &r2);
        manager.join(b, &r1);

        assert!(manager.leave(b, &r1));
        assert!(!manager.leave(b, &r1));
        assert_eq!(manager.room_size(&r1), 1);

        assert_eq!(manager.on_disconnect(a), vec![r1.clone(), r2.clone()]);
        assert!(manager.rooms().is_empty());
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.on_disconnect(a).is_empty());
    }

    #[test]
    fn full_queue_drops_without_blocking_others() {
        let manager = ConnectionManager::new();
        let (slow, _rx_slow) = connect(&manager, 1);
        let (fast, mut rx_fast) = connect(&manager, 8);
        let repo = RepoId::from("r1");
        manager.join(slow, &repo);
        manager.join(fast, &repo);

        assert_eq!(manager.publish(&repo, &sample("r1")), 2);
        assert_eq!(manager.publish(&repo, &sample("r1")), 1);
        assert_eq!(drain(&mut rx_fast).len(), 2);
    }

    #[test]
    fn publish_order_is_preserved_per_member() {
        let manager = ConnectionManager::new();
        let (a, mut rx) = connect(&manager, 16);
        let repo = RepoId::from("r1");
        manager.join(a, &repo);

        for n in 0..5 {
            let message =
                ServerMessage::Error(ErrorPayload::new(format!("m{n}")));
            RepoEventSink::publish(&manager, &repo, message);
        }
        let frames = drain(&mut rx);
        let expected: Vec<String> = (0..5)
            .map(|n| format!(r#"{{"event":"error","data":{{"message":"m{n}"}}}}"#))
            .collect();
        assert_eq!(frames, expected);
    }

    #[test]
    fn join_for_unknown_connection_is_ignored() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.join(Uuid::now_v7(), &RepoId::from("r1")), 0);
        assert!(manager.rooms().is_empty());
    }
}
