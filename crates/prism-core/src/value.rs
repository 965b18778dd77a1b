//! Dynamic column values and owned row data.
//!
//! Records delivered through snapshots are owned clones of store rows, so
//! consumers never hold store locks and a snapshot stays internally
//! consistent after later writes.

use crate::identifiers::{ColumnName, RecordId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A dynamic column value.
///
/// The store's column types are not known to the binder at compile time;
/// `Value` is the common currency for column reads, watched-column
/// fingerprints, and ordering comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent or null column value.
    Null,
    /// Boolean column value.
    Bool(bool),
    /// Integer column value.
    Int(i64),
    /// Floating-point column value.
    Float(f64),
    /// Text column value.
    Text(String),
}

impl Value {
    /// Total order over values, used for relation `order_by` sorting.
    ///
    /// Values of different variants order by variant (Null < Bool < Int <
    /// Float < Text); floats compare via `total_cmp` so sorting never
    /// panics on NaN.
    pub fn cmp_ord(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) => 2,
                Value::Float(_) => 3,
                Value::Text(_) => 4,
            }
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }

    /// View a text value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// View an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// An owned copy of one store row.
///
/// Field order is preserved as declared at insert time, which keeps record
/// comparisons and debug output stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    fields: IndexMap<ColumnName, Value>,
}

impl Record {
    /// Build a record from its primary key and field values.
    pub fn new(
        id: impl Into<RecordId>,
        fields: impl IntoIterator<Item = (ColumnName, Value)>,
    ) -> Self {
        Self {
            id: id.into(),
            fields: fields.into_iter().collect(),
        }
    }

    /// The record's primary key.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Read one column; absent columns read as `None`.
    pub fn get(&self, column: &ColumnName) -> Option<&Value> {
        self.fields.get(column)
    }

    /// Iterate over all (column, value) pairs in field order.
    pub fn fields(&self) -> impl Iterator<Item = (&ColumnName, &Value)> {
        self.fields.iter()
    }

    /// Overwrite or add one column value.
    pub fn set(&mut self, column: ColumnName, value: Value) {
        self.fields.insert(column, value);
    }

    /// Project the watched columns into a value vector.
    ///
    /// Absent columns project as `Value::Null`, so a column appearing for
    /// the first time registers as a change against a prior projection.
    pub fn project<'a>(&self, columns: impl IntoIterator<Item = &'a ColumnName>) -> Vec<Value> {
        columns
            .into_iter()
            .map(|c| self.fields.get(c).cloned().unwrap_or(Value::Null))
            .collect()
    }
}
