//! Typed identifiers for tables, columns, and records.
//!
//! All identifiers are cheap string newtypes. They exist so the binder never
//! confuses a column name with a table name, and so entity identity has a
//! single canonical representation.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from anything string-like.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// View the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

name_type! {
    /// Name of a store table.
    TableName
}

name_type! {
    /// Name of a column within a table.
    ColumnName
}

name_type! {
    /// Primary key of a record within its table.
    RecordId
}

/// An opaque handle to one stored record.
///
/// Identity is the pair (table, record id). An `EntityRef` is immutable once
/// constructed; two references to the same record compare equal. The binder
/// holds entity references as non-owning observers and never mutates the
/// referenced record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    table: TableName,
    id: RecordId,
}

impl EntityRef {
    /// Create a reference to the record `id` in `table`.
    pub fn new(table: impl Into<TableName>, id: impl Into<RecordId>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }

    /// The table this entity lives in.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// The record's primary key.
    pub fn id(&self) -> &RecordId {
        &self.id
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}
