//! # Prism Store - Store Interface & Reference Store
//!
//! **Purpose**: Define the narrow store surface the binder consumes, and
//! provide an in-memory reference store for tests and embedding.
//!
//! The binder depends only on three things from a store:
//!
//! - synchronous reads ([`StoreReader`]): record lookup, relation
//!   resolution and ordered relation reads, commit sequence
//! - change notification ([`ChangeSource`]): one [`ChangeBatch`] per
//!   committed transaction, fanned out synchronously to RAII-guarded
//!   observers
//! - a relation [`Schema`]: `has_many` foreign-key paths and `via_link`
//!   join-table paths, each with an optional `order_by` column
//!
//! Storage engines, schema migrations, and network synchronization are out
//! of scope; [`MemoryStore`] exists so the binder can be exercised without
//! a storage engine, not as a persistence layer.
//!
//! [`ChangeBatch`]: prism_core::ChangeBatch

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Store traits, observer registry, and subscription guards
pub mod interface;
/// In-memory reference store with transactional writes
pub mod memory;
/// Relation schema and resolution
pub mod schema;

pub use interface::{
    ChangeSource, CommitObserver, LocalStore, ObserverRegistry, StoreReader, SubscriptionGuard,
};
pub use memory::{MemoryStore, WriteTxn};
pub use schema::{Relation, RelationDef, RelationPath, Schema, TableDef};
