use crate::state::{EntityKind, StoreChange};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Synchronous change listener
pub type Listener = Arc<dyn Fn(&StoreChange) + Send + Sync>;

/// Which entity kinds a listener wants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindFilter {
    All,
    Only(EntityKind),
}

impl KindFilter {
    pub fn matches(&self, kind: EntityKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Only(wanted) => *wanted == kind,
        }
    }
}

impl From<EntityKind> for KindFilter {
    fn from(kind: EntityKind) -> Self {
        KindFilter::Only(kind)
    }
}

/// Registered listeners, keyed by subscription id
pub struct ListenerRegistry {
    listeners: DashMap<u64, (KindFilter, Listener)>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener; it stays registered until the handle is dropped
    pub fn register(self: &Arc<Self>, filter: KindFilter, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, (filter, listener));
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Call every listener whose filter matches the change.
    ///
    /// Listeners are collected first so a listener may unsubscribe (or
    /// subscribe) from inside its callback without holding a shard lock.
    pub fn notify(&self, change: &StoreChange) {
        let matching: Vec<Listener> = self
            .listeners
            .iter()
            .filter(|entry| entry.value().0.matches(change.key.kind))
            .map(|entry| Arc::clone(&entry.value().1))
            .collect();

        for listener in matching {
            listener(change);
        }
    }

    pub fn remove(&self, id: u64) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.listeners.contains_key(&id)
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Unsubscribe handle returned by `WorldStore::subscribe`.
///
/// Dropping the handle removes the listener.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// False once unsubscribed or after the store was closed
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map_or(false, |registry| registry.contains(self.id))
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
