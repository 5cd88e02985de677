//! Local callback registry fed by the agent's receive loop.
//!
//! Callbacks run on the agent task. A panicking callback is logged and
//! skipped; the remaining callbacks for the same message still run.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use beadwatch_model::{
    ChangeEvent, ErrorPayload, RepoSyncEvent, ServerMessage,
};
use parking_lot::Mutex;
use tracing::warn;

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
pub type SyncCallback = Arc<dyn Fn(&RepoSyncEvent) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ErrorPayload) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerCategory {
    Created,
    Changed,
    Deleted,
    Sync,
    Error,
}

impl ListenerCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ListenerCategory::Created => "created",
            ListenerCategory::Changed => "changed",
            ListenerCategory::Deleted => "deleted",
            ListenerCategory::Sync => "sync",
            ListenerCategory::Error => "error",
        }
    }
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    created: Vec<(u64, ChangeCallback)>,
    changed: Vec<(u64, ChangeCallback)>,
    deleted: Vec<(u64, ChangeCallback)>,
    sync: Vec<(u64, SyncCallback)>,
    error: Vec<(u64, ErrorCallback)>,
}

impl Slots {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn change_slot(
        &mut self,
        category: ListenerCategory,
    ) -> Option<&mut Vec<(u64, ChangeCallback)>> {
        match category {
            ListenerCategory::Created => Some(&mut self.created),
            ListenerCategory::Changed => Some(&mut self.changed),
            ListenerCategory::Deleted => Some(&mut self.deleted),
            ListenerCategory::Sync | ListenerCategory::Error => None,
        }
    }

    fn remove(&mut self, category: ListenerCategory, id: u64) -> bool {
        fn drop_id<T>(slot: &mut Vec<(u64, T)>, id: u64) -> bool {
            let before = slot.len();
            slot.retain(|(existing, _)| *existing != id);
            slot.len() != before
        }

        match category {
            ListenerCategory::Sync => drop_id(&mut self.sync, id),
            ListenerCategory::Error => drop_id(&mut self.error, id),
            other => self
                .change_slot(other)
                .is_some_and(|slot| drop_id(slot, id)),
        }
    }

    fn len(&self) -> usize {
        self.created.len()
            + self.changed.len()
            + self.deleted.len()
            + self.sync.len()
            + self.error.len()
    }
}

/// Callbacks grouped by the server event they react to.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Slots>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_created<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.register_change(ListenerCategory::Created, Arc::new(callback))
    }

    pub fn on_changed<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.register_change(ListenerCategory::Changed, Arc::new(callback))
    }

    pub fn on_deleted<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.register_change(ListenerCategory::Deleted, Arc::new(callback))
    }

    pub fn on_sync<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&RepoSyncEvent) + Send + Sync + 'static,
    {
        let mut slots = self.inner.lock();
        let id = slots.allocate();
        slots.sync.push((id, Arc::new(callback)));
        self.handle(ListenerCategory::Sync, id)
    }

    /// Server `error` messages and local transport failures both land here.
    pub fn on_error<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ErrorPayload) + Send + Sync + 'static,
    {
        let mut slots = self.inner.lock();
        let id = slots.allocate();
        slots.error.push((id, Arc::new(callback)));
        self.handle(ListenerCategory::Error, id)
    }

    pub(crate) fn register_change(
        &self,
        category: ListenerCategory,
        callback: ChangeCallback,
    ) -> ListenerHandle {
        let mut slots = self.inner.lock();
        let id = slots.allocate();
        if let Some(slot) = slots.change_slot(category) {
            slot.push((id, callback));
        }
        self.handle(category, id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route a server message to every listener of its category.
    /// Acknowledgements have no listener category and are ignored here.
    pub fn dispatch(&self, message: &ServerMessage) {
        match message {
            ServerMessage::Created(event) => {
                self.dispatch_change(ListenerCategory::Created, event)
            }
            ServerMessage::Changed(event) => {
                self.dispatch_change(ListenerCategory::Changed, event)
            }
            ServerMessage::Deleted(event) => {
                self.dispatch_change(ListenerCategory::Deleted, event)
            }
            ServerMessage::Sync(event) => {
                let callbacks: Vec<SyncCallback> = self
                    .inner
                    .lock()
                    .sync
                    .iter()
                    .map(|(_, cb)| Arc::clone(cb))
                    .collect();
                for callback in callbacks {
                    guarded(ListenerCategory::Sync, || callback(event));
                }
            }
            ServerMessage::Error(payload) => self.dispatch_error(payload),
            ServerMessage::Subscribed(_) | ServerMessage::Unsubscribed(_) => {}
        }
    }

    pub fn dispatch_error(&self, payload: &ErrorPayload) {
        let callbacks: Vec<ErrorCallback> = self
            .inner
            .lock()
            .error
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            guarded(ListenerCategory::Error, || callback(payload));
        }
    }

    fn dispatch_change(&self, category: ListenerCategory, event: &ChangeEvent) {
        // Snapshot so callbacks may register or unregister freely.
        let callbacks: Vec<ChangeCallback> = {
            let mut slots = self.inner.lock();
            slots
                .change_slot(category)
                .map(|slot| slot.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            guarded(category, || callback(event));
        }
    }

    fn handle(&self, category: ListenerCategory, id: u64) -> ListenerHandle {
        ListenerHandle {
            registry: Arc::downgrade(&self.inner),
            category,
            id,
        }
    }
}

fn guarded(category: ListenerCategory, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        warn!(category = category.as_str(), "listener panicked; skipping");
    }
}

/// Removes one registered callback. Dropping the handle keeps the callback
/// registered.
pub struct ListenerHandle {
    registry: Weak<Mutex<Slots>>,
    category: ListenerCategory,
    id: u64,
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("category", &self.category)
            .field("id", &self.id)
            .finish()
    }
}

impl ListenerHandle {
    pub fn category(&self) -> ListenerCategory {
        self.category
    }

    /// Returns `false` when the callback was already gone.
    pub fn unregister(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|slots| slots.lock().remove(self.category, self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beadwatch_model::{ChangeKind, ItemId, RepoId};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn modified() -> ServerMessage {
        ServerMessage::for_change(ChangeEvent::new(
            ChangeKind::Modified,
            RepoId::from("r1"),
            Some(ItemId::from("bd-1")),
            PathBuf::from("/repo/.beads/issues/bd-1.md"),
            chrono::Utc::now(),
        ))
    }

    #[test]
    fn routes_by_category() {
        let registry = ListenerRegistry::new();
        let changed = Arc::new(AtomicUsize::new(0));
        let created = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&changed);
        registry.on_changed(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&created);
        registry.on_created(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.dispatch(&modified());
        assert_eq!(changed.load(Ordering::SeqCst), 1);
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_starve_the_rest() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.on_changed(|_| panic!("boom"));
        let h = Arc::clone(&hits);
        registry.on_changed(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        registry.dispatch(&modified());
        registry.dispatch(&modified());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregister_removes_only_that_listener() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let first = registry.on_changed(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = Arc::clone(&hits);
        registry.on_changed(move |_| {
            h.fetch_add(10, Ordering::SeqCst);
        });

        assert!(first.unregister());
        assert!(!first.unregister());
        registry.dispatch(&modified());
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn server_errors_reach_error_listeners() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        registry.on_error(move |payload| {
            s.lock().push(payload.code.clone());
        });

        registry.dispatch(&ServerMessage::Error(
            ErrorPayload::new("bad").with_code("invalid_message"),
        ));
        assert_eq!(*seen.lock(), vec![Some("invalid_message".to_string())]);
    }
}
