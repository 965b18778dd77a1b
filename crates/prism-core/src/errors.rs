//! Unified binding error types.

use crate::identifiers::{EntityRef, TableName};
use thiserror::Error;

/// Errors surfaced while constructing or operating bindings.
///
/// Relation invalidation during a live subscription is not an error value:
/// it is delivered in-band as a terminal event so the consumer can render
/// an explicit "unavailable" state instead of crashing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    /// A declared relation path does not resolve on this schema.
    #[error("relation `{relation}` is not defined on table `{table}`")]
    InvalidRelationPath {
        /// Parent table the relation was looked up on.
        table: TableName,
        /// The relation name that failed to resolve.
        relation: String,
    },

    /// The named table is not part of the store schema.
    #[error("unknown table `{0}`")]
    UnknownTable(TableName),

    /// The referenced record does not exist.
    #[error("record `{0}` not found")]
    UnknownRecord(EntityRef),

    /// A record with the same primary key already exists.
    #[error("record `{0}` already exists")]
    DuplicateRecord(EntityRef),

    /// A binding spec factory required an input entity that was not given.
    #[error("required input `{0}` was not provided")]
    MissingInput(String),

    /// A watched column set must name at least one column.
    #[error("watched column set must not be empty")]
    EmptyColumnSet,

    /// The binder has been detached; no further operations are possible.
    #[error("binder is torn down")]
    TornDown,
}

/// Convenience alias for binding results.
pub type BindResult<T> = Result<T, BindError>;
