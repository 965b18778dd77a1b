//! Store traits, observer registry, and subscription guards.
//!
//! This is the entire surface the binder consumes from a store. Reads are
//! synchronous and expected to be fast (in-memory index, not disk I/O, in
//! the steady state). Change notification is per-transaction: one
//! [`ChangeBatch`] per commit, delivered synchronously to every registered
//! observer in registration order.
//!
//! Observer registration is RAII-guarded: dropping the
//! [`SubscriptionGuard`] unregisters the observer immediately, and a
//! dropped observer is never invoked again, even for a commit in the same
//! event-loop turn. [`ChangeSource::observer_count`] exists so tests can
//! assert that every subscribe had a matching teardown.

use parking_lot::Mutex;
use prism_core::{BindResult, ChangeBatch, EntityRef, Record};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::schema::{Relation, Schema};

/// Synchronous read access to store state.
pub trait StoreReader {
    /// The relation schema of this store.
    fn schema(&self) -> &Schema;

    /// Read one record; `Ok(None)` when the record does not exist.
    fn record(&self, entity: &EntityRef) -> BindResult<Option<Record>>;

    /// Read a relation's member records, ordered per the relation's
    /// `order_by`. Fails with `UnknownRecord` when the parent record has
    /// been deleted (the relation path no longer resolves to live data).
    fn relation_records(&self, relation: &Relation) -> BindResult<Vec<Record>>;

    /// The store's current commit sequence. Strictly increasing; every
    /// committed transaction bumps it by one.
    fn commit_seq(&self) -> u64;

    /// Resolve a named relation of `entity` against this store's schema.
    fn resolve_relation(&self, entity: &EntityRef, name: &str) -> BindResult<Relation> {
        self.schema().resolve_relation(entity, name)
    }
}

/// Callback invoked with each committed change batch.
pub type CommitObserver = Arc<dyn Fn(Arc<ChangeBatch>) + Send + Sync>;

/// Per-transaction change notification.
pub trait ChangeSource {
    /// Register an observer for committed change batches. The observer is
    /// invoked synchronously during commit, in registration order, until
    /// the returned guard is dropped.
    fn subscribe_commits(&self, observer: CommitObserver) -> SubscriptionGuard;

    /// Number of currently registered observers.
    fn observer_count(&self) -> usize;
}

/// The store surface the binder needs, bundled.
///
/// Blanket-implemented; stores opt in by implementing [`StoreReader`] and
/// [`ChangeSource`] on a cheaply cloneable handle.
pub trait LocalStore: StoreReader + ChangeSource + Clone + Send + Sync + 'static {}

impl<T> LocalStore for T where T: StoreReader + ChangeSource + Clone + Send + Sync + 'static {}

#[derive(Default)]
struct RegistryInner {
    next_key: u64,
    // BTreeMap keeps registration order for deterministic dispatch.
    observers: BTreeMap<u64, CommitObserver>,
}

/// Registry of commit observers with RAII unregistration.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ObserverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; it stays registered until the guard drops.
    pub fn register(&self, observer: CommitObserver) -> SubscriptionGuard {
        let mut inner = self.inner.lock();
        let key = inner.next_key;
        inner.next_key += 1;
        inner.observers.insert(key, observer);
        tracing::trace!(key, observers = inner.observers.len(), "observer registered");
        SubscriptionGuard {
            registry: Arc::downgrade(&self.inner),
            key,
        }
    }

    /// Snapshot the registered observers in registration order.
    ///
    /// Taken before dispatch so observer callbacks can re-enter the store
    /// (reads) without holding the registry lock.
    pub fn observers(&self) -> Vec<CommitObserver> {
        self.inner.lock().observers.values().cloned().collect()
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAII guard for one registered observer.
///
/// Dropping the guard unregisters the observer immediately; no callback
/// fires afterwards. Every `subscribe_commits` call owns exactly one guard,
/// which is what makes subscription leaks testable.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    registry: Weak<Mutex<RegistryInner>>,
    key: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut inner = registry.lock();
            inner.observers.remove(&self.key);
            tracing::trace!(
                key = self.key,
                observers = inner.observers.len(),
                "observer unregistered"
            );
        }
    }
}
