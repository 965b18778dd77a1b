//! Watched column sets.

use crate::errors::{BindError, BindResult};
use crate::identifiers::ColumnName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The fixed, non-empty set of columns a live query watches.
///
/// The watched set is fixed for the lifetime of a query; changing which
/// columns matter requires constructing a new query. The set is ordered so
/// that fingerprint projections are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSet(BTreeSet<ColumnName>);

impl ColumnSet {
    /// Build a column set; fails with [`BindError::EmptyColumnSet`] when no
    /// columns are given.
    pub fn new<I, C>(columns: I) -> BindResult<Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<ColumnName>,
    {
        let set: BTreeSet<ColumnName> = columns.into_iter().map(Into::into).collect();
        if set.is_empty() {
            return Err(BindError::EmptyColumnSet);
        }
        Ok(Self(set))
    }

    /// Whether `column` is watched.
    pub fn contains(&self, column: &ColumnName) -> bool {
        self.0.contains(column)
    }

    /// Iterate the watched columns in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &ColumnName> {
        self.0.iter()
    }

    /// Number of watched columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// A column set is never empty; kept for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
