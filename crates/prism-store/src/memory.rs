//! In-memory reference store with transactional writes.
//!
//! [`MemoryStore`] is the reference implementation of the store surface:
//! tables of rows held in memory, written through closures over a
//! [`WriteTxn`], with exactly one [`ChangeBatch`] dispatched per committed
//! transaction. It exists to exercise the binder (tests, demos, embedded
//! use); it is not a persistence layer.
//!
//! ## Atomicity
//!
//! A transaction either commits fully or leaves the store untouched: the
//! closure mutates a working copy of the tables, which replaces the live
//! state only on success. Observers therefore never see a torn write, and
//! a transaction touching several tables produces a single batch.
//!
//! ## Dispatch
//!
//! Observers are invoked synchronously at commit, in registration order,
//! after the state lock is released, so observer callbacks are free to
//! read the store.

use indexmap::IndexMap;
use parking_lot::RwLock;
use prism_core::{
    BindError, BindResult, ChangeBatch, ColumnName, EntityRef, Record, RecordId, RowChange,
    TableName, Value,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::interface::{ChangeSource, CommitObserver, ObserverRegistry, SubscriptionGuard};
use crate::schema::{Relation, RelationPath, Schema};
use crate::StoreReader;

type Tables = HashMap<TableName, IndexMap<RecordId, Record>>;

struct StoreShared {
    schema: Schema,
    state: RwLock<Tables>,
    seq: AtomicU64,
    observers: ObserverRegistry,
}

/// In-memory reference store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreShared>,
}

impl MemoryStore {
    /// An empty store over `schema`.
    pub fn new(schema: Schema) -> Self {
        Self {
            inner: Arc::new(StoreShared {
                schema,
                state: RwLock::new(Tables::new()),
                seq: AtomicU64::new(0),
                observers: ObserverRegistry::new(),
            }),
        }
    }

    /// Run one transaction.
    ///
    /// All writes in `f` commit atomically; on error nothing is applied.
    /// Returns the commit sequence of the transaction. A transaction that
    /// performed no writes commits nothing and dispatches no batch.
    pub fn write<F>(&self, f: F) -> BindResult<u64>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> BindResult<()>,
    {
        let batch = {
            let mut state = self.inner.state.write();
            let mut working = state.clone();
            let mut txn = WriteTxn {
                schema: &self.inner.schema,
                tables: &mut working,
                changes: Vec::new(),
            };
            f(&mut txn)?;
            let changes = txn.changes;
            if changes.is_empty() {
                return Ok(self.inner.seq.load(Ordering::SeqCst));
            }
            *state = working;
            let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
            Arc::new(ChangeBatch { seq, changes })
        };

        tracing::debug!(
            seq = batch.seq,
            changes = batch.changes.len(),
            "transaction committed"
        );

        // Lock released above; observers may read the store.
        for observer in self.inner.observers.observers() {
            observer(Arc::clone(&batch));
        }
        Ok(batch.seq)
    }

    fn read_record(tables: &Tables, entity: &EntityRef) -> Option<Record> {
        tables
            .get(entity.table())
            .and_then(|rows| rows.get(entity.id()))
            .cloned()
    }

    fn sort_records(records: &mut [Record], order_by: &ColumnName) {
        // Stable sort keeps insertion order for ties.
        records.sort_by(|a, b| {
            let av = a.get(order_by).cloned().unwrap_or(Value::Null);
            let bv = b.get(order_by).cloned().unwrap_or(Value::Null);
            av.cmp_ord(&bv)
        });
    }
}

impl StoreReader for MemoryStore {
    fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    fn record(&self, entity: &EntityRef) -> BindResult<Option<Record>> {
        if !self.inner.schema.has_table(entity.table()) {
            return Err(BindError::UnknownTable(entity.table().clone()));
        }
        Ok(Self::read_record(&self.inner.state.read(), entity))
    }

    fn relation_records(&self, relation: &Relation) -> BindResult<Vec<Record>> {
        let tables = self.inner.state.read();

        // A relation over a deleted parent no longer resolves to live data.
        if Self::read_record(&tables, &relation.parent).is_none() {
            return Err(BindError::UnknownRecord(relation.parent.clone()));
        }

        let parent_id = Value::Text(relation.parent.id().as_str().to_string());
        match &relation.path {
            RelationPath::HasMany { table, foreign_key } => {
                let mut records: Vec<Record> = tables
                    .get(table)
                    .map(|rows| {
                        rows.values()
                            .filter(|r| r.get(foreign_key) == Some(&parent_id))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                if let Some(order_by) = &relation.order_by {
                    Self::sort_records(&mut records, order_by);
                }
                Ok(records)
            }
            RelationPath::ViaLink {
                link_table,
                link_parent_key,
                link_child_key,
                child_table,
            } => {
                let mut links: Vec<Record> = tables
                    .get(link_table)
                    .map(|rows| {
                        rows.values()
                            .filter(|r| r.get(link_parent_key) == Some(&parent_id))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                if let Some(order_by) = &relation.order_by {
                    Self::sort_records(&mut links, order_by);
                }
                // Links whose child row is gone are skipped rather than
                // surfaced as holes.
                let records = links
                    .iter()
                    .filter_map(|link| link.get(link_child_key).and_then(Value::as_str))
                    .filter_map(|child_id| {
                        tables
                            .get(child_table)
                            .and_then(|rows| rows.get(&RecordId::new(child_id)))
                            .cloned()
                    })
                    .collect();
                Ok(records)
            }
        }
    }

    fn commit_seq(&self) -> u64 {
        self.inner.seq.load(Ordering::SeqCst)
    }
}

impl ChangeSource for MemoryStore {
    fn subscribe_commits(&self, observer: CommitObserver) -> SubscriptionGuard {
        self.inner.observers.register(observer)
    }

    fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

/// Write handle passed to [`MemoryStore::write`] closures.
pub struct WriteTxn<'a> {
    schema: &'a Schema,
    tables: &'a mut Tables,
    changes: Vec<RowChange>,
}

impl WriteTxn<'_> {
    /// Insert a new row.
    pub fn insert(
        &mut self,
        table: impl Into<TableName>,
        id: impl Into<RecordId>,
        fields: impl IntoIterator<Item = (ColumnName, Value)>,
    ) -> BindResult<()> {
        let table = table.into();
        let id = id.into();
        if !self.schema.has_table(&table) {
            return Err(BindError::UnknownTable(table));
        }
        let rows = self.tables.entry(table.clone()).or_default();
        if rows.contains_key(&id) {
            return Err(BindError::DuplicateRecord(EntityRef::new(table, id)));
        }
        rows.insert(id.clone(), Record::new(id.clone(), fields));
        self.changes.push(RowChange::Inserted { table, id });
        Ok(())
    }

    /// Write columns of an existing row.
    pub fn update(
        &mut self,
        table: impl Into<TableName>,
        id: impl Into<RecordId>,
        writes: impl IntoIterator<Item = (ColumnName, Value)>,
    ) -> BindResult<()> {
        let table = table.into();
        let id = id.into();
        let record = self
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.get_mut(&id))
            .ok_or_else(|| BindError::UnknownRecord(EntityRef::new(table.clone(), id.clone())))?;

        let mut columns = std::collections::BTreeSet::new();
        for (column, value) in writes {
            record.set(column.clone(), value);
            columns.insert(column);
        }
        self.changes.push(RowChange::Updated { table, id, columns });
        Ok(())
    }

    /// Delete a row.
    pub fn delete(
        &mut self,
        table: impl Into<TableName>,
        id: impl Into<RecordId>,
    ) -> BindResult<()> {
        let table = table.into();
        let id = id.into();
        let removed = self
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.shift_remove(&id));
        if removed.is_none() {
            return Err(BindError::UnknownRecord(EntityRef::new(table, id)));
        }
        self.changes.push(RowChange::Deleted { table, id });
        Ok(())
    }
}
