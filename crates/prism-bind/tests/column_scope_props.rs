//! Property tests for column-scoped change detection.
//!
//! Drives the query state machine with arbitrary write sequences and
//! checks the visibility rule: an emission happens exactly when the
//! watched projection of the result changed, never otherwise.

use parking_lot::Mutex;
use prism_bind::{ColumnQuery, QueryEvent, QueryTarget};
use prism_core::{BindResult, ChangeBatch, ColumnName, ColumnSet, EntityRef, Value};
use prism_store::{ChangeSource, MemoryStore, Schema, TableDef, WriteTxn};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum WriteOp {
    Watched(String),
    Unwatched(String),
}

fn write_op() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(WriteOp::Watched),
        "[a-z]{1,8}".prop_map(WriteOp::Unwatched),
    ]
}

fn store_with_channel(name: &str) -> MemoryStore {
    let store = MemoryStore::new(Schema::new().with_table("channel", TableDef::new()));
    store
        .write(|tx| {
            tx.insert(
                "channel",
                "ch1",
                vec![
                    (ColumnName::new("display_name"), Value::from(name)),
                    (ColumnName::new("header"), Value::from("")),
                ],
            )
        })
        .expect("seeds");
    store
}

fn write_and_capture<F>(store: &MemoryStore, f: F) -> Arc<ChangeBatch>
where
    F: FnOnce(&mut WriteTxn<'_>) -> BindResult<()>,
{
    let slot: Arc<Mutex<Option<Arc<ChangeBatch>>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    let guard = store.subscribe_commits(Arc::new(move |batch| {
        *sink.lock() = Some(batch);
    }));
    store.write(f).expect("commits");
    drop(guard);
    let batch = slot.lock().take().expect("one batch per transaction");
    batch
}

proptest! {
    /// Emissions track the watched projection exactly: a write to the
    /// watched column emits iff the value actually changed, and a write
    /// to an unwatched column never emits.
    #[test]
    fn emission_iff_watched_projection_changed(ops in prop::collection::vec(write_op(), 1..40)) {
        let store = store_with_channel("initial");
        let (mut query, _) = ColumnQuery::open(
            &store,
            QueryTarget::Entity(EntityRef::new("channel", "ch1")),
            ColumnSet::new(["display_name"]).expect("non-empty"),
        )
        .expect("opens");

        let mut last_watched = "initial".to_string();
        for op in ops {
            match op {
                WriteOp::Watched(value) => {
                    let batch = write_and_capture(&store, |tx| {
                        tx.update(
                            "channel",
                            "ch1",
                            vec![(ColumnName::new("display_name"), Value::from(value.clone()))],
                        )
                    });
                    let event = query.apply(&store, &batch);
                    if value == last_watched {
                        prop_assert_eq!(event, None);
                    } else {
                        let observed = match event {
                            Some(QueryEvent::Changed(v)) => v
                                .as_record()
                                .and_then(|r| r.get(&ColumnName::new("display_name")))
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            other => {
                                return Err(TestCaseError::fail(format!(
                                    "expected Changed, got {other:?}"
                                )))
                            }
                        };
                        prop_assert_eq!(observed.as_deref(), Some(value.as_str()));
                        last_watched = value;
                    }
                }
                WriteOp::Unwatched(value) => {
                    let batch = write_and_capture(&store, |tx| {
                        tx.update(
                            "channel",
                            "ch1",
                            vec![(ColumnName::new("header"), Value::from(value))],
                        )
                    });
                    prop_assert_eq!(query.apply(&store, &batch), None);
                }
            }
        }
    }

    /// Rewriting the watched column to its current value is invisible:
    /// change detection diffs values, not write events.
    #[test]
    fn idempotent_watched_write_is_silent(name in "[a-z]{1,12}") {
        let store = store_with_channel(&name);
        let (mut query, _) = ColumnQuery::open(
            &store,
            QueryTarget::Entity(EntityRef::new("channel", "ch1")),
            ColumnSet::new(["display_name"]).expect("non-empty"),
        )
        .expect("opens");

        let batch = write_and_capture(&store, |tx| {
            tx.update(
                "channel",
                "ch1",
                vec![(ColumnName::new("display_name"), Value::from(name.clone()))],
            )
        });
        prop_assert_eq!(query.apply(&store, &batch), None);
    }
}
