//! Per-transaction change batches.
//!
//! A store fans out exactly one [`ChangeBatch`] per committed transaction,
//! synchronously, to every registered observer. Batches carry enough
//! information for a query to decide cheaply whether it might be affected
//! (table relevance); the actual emit/no-emit decision is a watched-column
//! diff done by the query itself.

use crate::identifiers::{ColumnName, RecordId, TableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One row-level change within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowChange {
    /// A row was inserted.
    Inserted {
        /// Table the row belongs to.
        table: TableName,
        /// Primary key of the inserted row.
        id: RecordId,
    },
    /// Columns of an existing row were written.
    Updated {
        /// Table the row belongs to.
        table: TableName,
        /// Primary key of the updated row.
        id: RecordId,
        /// The columns that were written (whether or not the value differed).
        columns: BTreeSet<ColumnName>,
    },
    /// A row was deleted.
    Deleted {
        /// Table the row belonged to.
        table: TableName,
        /// Primary key of the deleted row.
        id: RecordId,
    },
}

impl RowChange {
    /// The table this change touches.
    pub fn table(&self) -> &TableName {
        match self {
            RowChange::Inserted { table, .. }
            | RowChange::Updated { table, .. }
            | RowChange::Deleted { table, .. } => table,
        }
    }

    /// The primary key this change touches.
    pub fn id(&self) -> &RecordId {
        match self {
            RowChange::Inserted { id, .. }
            | RowChange::Updated { id, .. }
            | RowChange::Deleted { id, .. } => id,
        }
    }
}

/// The change summary for one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Store commit sequence this batch was committed at. Strictly
    /// increasing across batches from the same store.
    pub seq: u64,
    /// Row changes in write order.
    pub changes: Vec<RowChange>,
}

impl ChangeBatch {
    /// Whether any change in the batch touches `table`.
    pub fn touches_table(&self, table: &TableName) -> bool {
        self.changes.iter().any(|c| c.table() == table)
    }

    /// Whether any change in the batch touches one of `tables`.
    pub fn touches_any<'a>(&self, tables: impl IntoIterator<Item = &'a TableName>) -> bool {
        tables.into_iter().any(|t| self.touches_table(t))
    }
}
