//! Subscription multiplexer: many live queries, one snapshot stream.
//!
//! [`combine`] opens one [`ColumnQuery`] per observed binding, registers
//! one store subscription per observed binding, and funnels all of their
//! change notifications into a single delivery channel. A background task
//! drains that channel until it is empty before composing a snapshot, so
//! a commit that touches several bindings produces exactly one delivery
//! with every affected value updated together. Consumers can never observe
//! a torn state where one binding reflects a commit and a sibling does not.
//!
//! Delivery order per multiplexer: the initial snapshot synchronously
//! during [`combine`], then at most one snapshot per change-propagation
//! turn, each tagged with a commit sequence no older than the previous
//! delivery's.
//!
//! Subscriptions are registered before the initial read. A commit racing
//! the setup is queued and later re-diffed against the initial
//! fingerprints, which yields either nothing (already reflected) or one
//! correct snapshot; there is no window where a change can be missed.

use indexmap::IndexMap;
use parking_lot::Mutex;
use prism_core::{BindResult, BindingValue, ChangeBatch, ColumnSet, EntityRef, Snapshot};
use prism_store::{LocalStore, Relation, SubscriptionGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::query::{ColumnQuery, QueryEvent, QueryTarget};

/// How one binding sources its value.
#[derive(Debug, Clone)]
pub enum QuerySpec {
    /// Observe a record or relation, reacting to the given columns.
    Observe {
        /// What to observe.
        target: QueryTarget,
        /// Columns whose changes are visible to this binding.
        columns: ColumnSet,
    },
    /// Forward an entity reference as-is, with no store subscription.
    PassThrough(EntityRef),
}

impl QuerySpec {
    /// Observe a single record.
    pub fn observe_entity(entity: EntityRef, columns: ColumnSet) -> Self {
        QuerySpec::Observe {
            target: QueryTarget::Entity(entity),
            columns,
        }
    }

    /// Observe a relation's member records.
    pub fn observe_relation(relation: Relation, columns: ColumnSet) -> Self {
        QuerySpec::Observe {
            target: QueryTarget::Relation(relation),
            columns,
        }
    }

    /// Forward `entity` unobserved.
    pub fn pass_through(entity: EntityRef) -> Self {
        QuerySpec::PassThrough(entity)
    }
}

/// Named bindings a consumer declares, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct BindingSpec {
    entries: IndexMap<String, QuerySpec>,
}

impl BindingSpec {
    /// An empty spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding. A repeated name replaces the earlier entry but keeps
    /// its position.
    pub fn with(mut self, name: impl Into<String>, spec: QuerySpec) -> Self {
        self.entries.insert(name.into(), spec);
        self
    }

    /// Number of declared bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no bindings are declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate (name, spec) pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &QuerySpec)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One delivery from the multiplexer.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    /// A new consistent composite of all bound values.
    Snapshot(Snapshot),
    /// Terminal: the named binding's query path stopped resolving. The
    /// multiplexer has already torn itself down; no delivery follows.
    Unavailable {
        /// Name of the binding that failed.
        binding: String,
    },
}

/// Consumer-side receiver of snapshot deliveries.
///
/// Deliveries happen on the multiplexer's task (and once, synchronously,
/// inside [`combine`]); implementations must not block.
pub trait SnapshotSink: Send + Sync {
    /// Accept one delivery.
    fn deliver(&self, event: SnapshotEvent);
}

impl<F> SnapshotSink for F
where
    F: Fn(SnapshotEvent) + Send + Sync,
{
    fn deliver(&self, event: SnapshotEvent) {
        self(event)
    }
}

/// Multiplexer tuning.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Extra time to wait after the first notification of a turn before
    /// composing, so that near-simultaneous commits coalesce into one
    /// snapshot. Zero disables the wait; the drain-until-empty pass alone
    /// already guarantees per-commit atomicity.
    pub batch_window: Duration,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(1),
        }
    }
}

enum Slot {
    Observed { query: ColumnQuery, latest: BindingValue },
    PassThrough(EntityRef),
}

struct MuxShared {
    torn_down: AtomicBool,
    guards: Mutex<Vec<SubscriptionGuard>>,
}

impl MuxShared {
    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Idempotent. After this returns the store holds no observers for
    /// this multiplexer and the delivery task suppresses further sends.
    fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        self.guards.lock().clear();
    }
}

/// Handle to a running multiplexer.
///
/// Tearing down (explicitly or by drop) releases every store subscription
/// synchronously; no snapshot delivery begins afterwards.
pub struct Multiplexer {
    shared: Arc<MuxShared>,
    names: Vec<String>,
    observed: usize,
    task: Option<JoinHandle<()>>,
}

impl Multiplexer {
    /// Binding names in declaration order.
    pub fn binding_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of store subscriptions this multiplexer holds while live.
    pub fn subscription_count(&self) -> usize {
        if self.shared.is_torn_down() {
            0
        } else {
            self.observed
        }
    }

    /// Whether the multiplexer has been torn down.
    pub fn is_torn_down(&self) -> bool {
        self.shared.is_torn_down()
    }

    /// Release all subscriptions and stop the delivery task.
    pub fn teardown(&mut self) {
        self.shared.teardown();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::debug!(bindings = self.names.len(), "multiplexer torn down");
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Compose `spec` into one live snapshot stream delivered to `sink`.
///
/// Subscribes, reads every binding's initial value, delivers the initial
/// [`SnapshotEvent::Snapshot`] synchronously before returning, then keeps
/// delivering on the spawned task until torn down or a binding becomes
/// unavailable. Fails without side effects when a binding's initial read
/// fails (missing record, unknown table).
///
/// Must be called within a Tokio runtime.
pub fn combine<S: LocalStore>(
    store: &S,
    spec: BindingSpec,
    sink: Arc<dyn SnapshotSink>,
    config: MuxConfig,
) -> BindResult<Multiplexer> {
    let shared = Arc::new(MuxShared {
        torn_down: AtomicBool::new(false),
        guards: Mutex::new(Vec::new()),
    });
    let (tx, rx) = mpsc::unbounded_channel::<Arc<ChangeBatch>>();

    // Subscribe first: one observer per observed binding. Each forwards
    // the whole batch; the task dedupes by commit seq and every query
    // filters by its own relevant tables, so the fan-in stays atomic.
    let mut guards = Vec::new();
    for (_, entry) in spec.iter() {
        if matches!(entry, QuerySpec::Observe { .. }) {
            let tx = tx.clone();
            let shared_cb = Arc::clone(&shared);
            guards.push(store.subscribe_commits(Arc::new(move |batch| {
                if !shared_cb.is_torn_down() {
                    let _ = tx.send(batch);
                }
            })));
        }
    }
    let observed = guards.len();

    // Initial reads after subscription: a racing commit is re-diffed by
    // the task instead of lost.
    let mut names = Vec::with_capacity(spec.len());
    let mut slots = Vec::with_capacity(spec.len());
    for (name, entry) in spec.iter() {
        names.push(name.to_string());
        match entry {
            QuerySpec::Observe { target, columns } => {
                let (query, initial) =
                    ColumnQuery::open(store, target.clone(), columns.clone())?;
                slots.push(Slot::Observed {
                    query,
                    latest: initial,
                });
            }
            QuerySpec::PassThrough(entity) => {
                slots.push(Slot::PassThrough(entity.clone()));
            }
        }
    }
    *shared.guards.lock() = guards;

    sink.deliver(SnapshotEvent::Snapshot(compose(
        store.commit_seq(),
        &names,
        &slots,
    )));
    tracing::debug!(
        bindings = names.len(),
        observed,
        "multiplexer combined, initial snapshot delivered"
    );

    let task = tokio::spawn(run_mux(
        store.clone(),
        Arc::clone(&shared),
        names.clone(),
        slots,
        rx,
        sink,
        config,
    ));

    Ok(Multiplexer {
        shared,
        names,
        observed,
        task: Some(task),
    })
}

async fn run_mux<S: LocalStore>(
    store: S,
    shared: Arc<MuxShared>,
    names: Vec<String>,
    mut slots: Vec<Slot>,
    mut rx: mpsc::UnboundedReceiver<Arc<ChangeBatch>>,
    sink: Arc<dyn SnapshotSink>,
    config: MuxConfig,
) {
    // Highest commit seq already folded into the slots. Per-binding
    // observers forward the same batch once each; anything at or below
    // this mark is a duplicate or already reflected by the initial read.
    let mut seen_seq = 0u64;

    while let Some(first) = rx.recv().await {
        let mut pending = vec![first];
        if !config.batch_window.is_zero() {
            tokio::time::sleep(config.batch_window).await;
        }
        // Drain until empty: everything queued in this turn composes into
        // one snapshot.
        while let Ok(batch) = rx.try_recv() {
            pending.push(batch);
        }
        if shared.is_torn_down() {
            return;
        }

        let mut dirty = false;
        let mut failed: Option<String> = None;
        'batches: for batch in pending {
            if batch.seq <= seen_seq {
                continue;
            }
            seen_seq = batch.seq;
            for (idx, slot) in slots.iter_mut().enumerate() {
                let Slot::Observed { query, latest } = slot else {
                    continue;
                };
                match query.apply(&store, &batch) {
                    Some(QueryEvent::Changed(value)) => {
                        *latest = value;
                        dirty = true;
                    }
                    Some(QueryEvent::Invalidated) => {
                        failed = Some(names[idx].clone());
                        break 'batches;
                    }
                    None => {}
                }
            }
        }

        if let Some(binding) = failed {
            // Terminal: release subscriptions before notifying, so the
            // sink observes a fully quiesced multiplexer.
            shared.teardown();
            tracing::warn!(%binding, "binding unavailable, multiplexer torn down");
            sink.deliver(SnapshotEvent::Unavailable { binding });
            return;
        }
        if dirty && !shared.is_torn_down() {
            sink.deliver(SnapshotEvent::Snapshot(compose(
                store.commit_seq(),
                &names,
                &slots,
            )));
        }
    }
}

fn compose(seq: u64, names: &[String], slots: &[Slot]) -> Snapshot {
    Snapshot::new(
        seq,
        names.iter().zip(slots).map(|(name, slot)| {
            let value = match slot {
                Slot::Observed { latest, .. } => latest.clone(),
                Slot::PassThrough(entity) => BindingValue::Entity(entity.clone()),
            };
            (name.clone(), value)
        }),
    )
}
