//! Column-scoped live queries.
//!
//! A [`ColumnQuery`] watches one record or one relation, but reacts only to
//! a fixed set of columns. Change detection is an explicit diff: each
//! emission records a *fingerprint* — the ordered `(record id, watched
//! values)` projection of the current result — and a commit triggers a new
//! emission only when the recomputed fingerprint differs. Membership
//! changes, reorders, and watched-column writes all alter the fingerprint;
//! writes to unwatched columns never do. That filtering is the mechanism's
//! core optimization and is implemented here rather than assumed from the
//! store.
//!
//! Queries terminate with [`QueryEvent::Invalidated`] when their relation
//! path stops resolving (parent or target record deleted) instead of going
//! silently stale.

use parking_lot::Mutex;
use prism_core::{
    BindError, BindResult, BindingValue, ChangeBatch, ColumnSet, EntityRef, RecordId, TableName,
    Value,
};
use prism_store::{LocalStore, Relation, StoreReader, SubscriptionGuard};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What a query observes: one record or one relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// A single record; emits when a watched column of that record changes.
    Entity(EntityRef),
    /// A relation; emits on membership, order, or watched-column changes.
    Relation(Relation),
}

impl QueryTarget {
    /// Tables whose commits can affect this target.
    pub fn relevant_tables(&self) -> Vec<TableName> {
        match self {
            QueryTarget::Entity(entity) => vec![entity.table().clone()],
            QueryTarget::Relation(relation) => relation.relevant_tables(),
        }
    }
}

/// One emission from a live query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    /// The watched projection changed; carries the full current value.
    Changed(BindingValue),
    /// Terminal: the relation path no longer resolves. No further events.
    Invalidated,
}

/// Ordered projection of a result set onto the watched columns.
///
/// Two results with equal fingerprints are indistinguishable to the
/// consumer under the query's column scope, so no emission happens.
type Fingerprint = Vec<(RecordId, Vec<Value>)>;

/// Pure change-detection state machine for one column-scoped query.
///
/// Driven by feeding it commit batches via [`ColumnQuery::apply`]; the
/// multiplexer drives one `ColumnQuery` per observed binding. For a
/// standalone event stream, see [`observe`].
#[derive(Debug)]
pub struct ColumnQuery {
    target: QueryTarget,
    columns: ColumnSet,
    relevant_tables: Vec<TableName>,
    fingerprint: Fingerprint,
    invalidated: bool,
}

impl ColumnQuery {
    /// Open a query and read its initial value from current store state.
    ///
    /// The watched column set is fixed for the lifetime of the query;
    /// watching different columns means opening a new query.
    pub fn open<S: StoreReader>(
        store: &S,
        target: QueryTarget,
        columns: ColumnSet,
    ) -> BindResult<(Self, BindingValue)> {
        let (value, fingerprint) = Self::read(store, &target, &columns)?;
        let relevant_tables = target.relevant_tables();
        tracing::trace!(target = ?target, watched = columns.len(), "query opened");
        Ok((
            Self {
                target,
                columns,
                relevant_tables,
                fingerprint,
                invalidated: false,
            },
            value,
        ))
    }

    /// The query's target.
    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    /// The fixed watched column set.
    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    /// Whether the query has terminated.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Feed one committed change batch.
    ///
    /// Returns `None` when the commit is invisible under the column scope:
    /// it touches no relevant table, or it only wrote unwatched columns.
    /// Returns a terminal `Invalidated` when the target stops resolving;
    /// the query emits nothing afterwards.
    pub fn apply<S: StoreReader>(
        &mut self,
        store: &S,
        batch: &ChangeBatch,
    ) -> Option<QueryEvent> {
        if self.invalidated {
            return None;
        }
        if !batch.touches_any(self.relevant_tables.iter()) {
            return None;
        }
        match Self::read(store, &self.target, &self.columns) {
            Ok((value, fingerprint)) => {
                if fingerprint == self.fingerprint {
                    return None;
                }
                self.fingerprint = fingerprint;
                Some(QueryEvent::Changed(value))
            }
            Err(err) => {
                tracing::debug!(target = ?self.target, %err, "query invalidated");
                self.invalidated = true;
                Some(QueryEvent::Invalidated)
            }
        }
    }

    fn read<S: StoreReader>(
        store: &S,
        target: &QueryTarget,
        columns: &ColumnSet,
    ) -> BindResult<(BindingValue, Fingerprint)> {
        match target {
            QueryTarget::Entity(entity) => {
                let record = store
                    .record(entity)?
                    .ok_or_else(|| BindError::UnknownRecord(entity.clone()))?;
                let fingerprint = vec![(record.id().clone(), record.project(columns.iter()))];
                Ok((BindingValue::Record(record), fingerprint))
            }
            QueryTarget::Relation(relation) => {
                let records = store.relation_records(relation)?;
                let fingerprint = records
                    .iter()
                    .map(|r| (r.id().clone(), r.project(columns.iter())))
                    .collect();
                Ok((BindingValue::Records(records), fingerprint))
            }
        }
    }
}

/// A standalone live query: initial value plus an event stream.
///
/// Dropping the `LiveQuery` unsubscribes immediately; no event is
/// delivered afterwards, even for a commit in the same event-loop turn.
/// There is no implicit timeout.
pub struct LiveQuery {
    initial: BindingValue,
    events: mpsc::UnboundedReceiver<QueryEvent>,
    _guard: SubscriptionGuard,
}

impl LiveQuery {
    /// The value read synchronously at subscription time.
    pub fn initial(&self) -> &BindingValue {
        &self.initial
    }

    /// Await the next event. `None` once the query has terminated and all
    /// pending events were drained.
    pub async fn next_event(&mut self) -> Option<QueryEvent> {
        self.events.recv().await
    }

    /// Take the next already-delivered event without waiting.
    pub fn try_next_event(&mut self) -> Option<QueryEvent> {
        self.events.try_recv().ok()
    }
}

/// Open a standalone live query over `target`, watching `columns`.
///
/// The store subscription is registered before the initial read, so a
/// commit racing the setup is re-diffed against the initial fingerprint:
/// either it is already reflected (no spurious event) or it produces a
/// correct one. There is no missed-initial-event window.
pub fn observe<S: LocalStore>(
    store: &S,
    target: QueryTarget,
    columns: ColumnSet,
) -> BindResult<LiveQuery> {
    let (tx, rx) = mpsc::unbounded_channel();
    let state: Arc<Mutex<Option<ColumnQuery>>> = Arc::new(Mutex::new(None));

    let cb_store = store.clone();
    let cb_state = Arc::clone(&state);
    let guard = store.subscribe_commits(Arc::new(move |batch| {
        let mut slot = cb_state.lock();
        let Some(query) = slot.as_mut() else {
            return;
        };
        if let Some(event) = query.apply(&cb_store, &batch) {
            let terminal = matches!(event, QueryEvent::Invalidated);
            let _ = tx.send(event);
            if terminal {
                *slot = None;
            }
        }
    }));

    let (query, initial) = ColumnQuery::open(store, target, columns)?;
    *state.lock() = Some(query);

    Ok(LiveQuery {
        initial,
        events: rx,
        _guard: guard,
    })
}
