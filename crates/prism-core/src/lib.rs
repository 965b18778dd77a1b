//! # Prism Core - Binding Domain Types
//!
//! **Purpose**: Define the data model shared by the store interface and the
//! reactive binder: identifiers, column values, change batches, and
//! snapshots.
//!
//! This crate is pure and synchronous: no async machinery, no store access,
//! no subscription logic. Higher layers (`prism-store`, `prism-bind`) build
//! on these types.
//!
//! ## Core Concepts
//!
//! - **Entity Reference**: opaque handle to one stored record, identified by
//!   (table, record id). Two references to the same record compare equal.
//! - **Change Batch**: the per-transaction change summary a store fans out
//!   to observers. One transaction produces exactly one batch.
//! - **Snapshot**: an immutable, fully-populated composite of bound values,
//!   tagged with the store commit sequence it reflects.
//!
//! ## What's NOT in this crate
//!
//! - Store access and relation resolution (`prism-store`)
//! - Live queries, multiplexing, binder lifecycle (`prism-bind`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Change batches and per-row change records
pub mod change;
/// Watched column sets
pub mod column;
/// Unified binding error types
pub mod errors;
/// Table, column, and record identifiers
pub mod identifiers;
/// Composite snapshots of bound values
pub mod snapshot;
/// Dynamic column values and owned row data
pub mod value;

pub use change::{ChangeBatch, RowChange};
pub use column::ColumnSet;
pub use errors::{BindError, BindResult};
pub use identifiers::{ColumnName, EntityRef, RecordId, TableName};
pub use snapshot::{BindingValue, Snapshot};
pub use value::{Record, Value};
