//! Composite snapshots of bound values.
//!
//! A snapshot is the unit of delivery from the multiplexer to a consumer:
//! an immutable mapping from binding name to current value, tagged with the
//! store commit sequence it reflects. Every snapshot contains a value for
//! every declared binding; a snapshot missing a binding key is a structural
//! defect and cannot be constructed through this API.

use crate::identifiers::EntityRef;
use crate::value::Record;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The current value of one binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BindingValue {
    /// A single observed record.
    Record(Record),
    /// An observed relation: ordered collection of records.
    Records(Vec<Record>),
    /// A pass-through entity reference, forwarded unobserved.
    Entity(EntityRef),
}

impl BindingValue {
    /// The records of a collection binding, if this is one.
    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            BindingValue::Records(rs) => Some(rs),
            _ => None,
        }
    }

    /// The record of a single-record binding, if this is one.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            BindingValue::Record(r) => Some(r),
            _ => None,
        }
    }
}

/// An atomic, fully-populated composite of all bound values.
///
/// Internally consistent: every value reflects a state of the store no
/// earlier than, and no partially newer than, any other value in the same
/// snapshot. Binding order matches declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    seq: u64,
    values: IndexMap<String, BindingValue>,
}

impl Snapshot {
    /// Build a snapshot at commit sequence `seq` from (name, value) pairs.
    pub fn new(seq: u64, values: impl IntoIterator<Item = (String, BindingValue)>) -> Self {
        Self {
            seq,
            values: values.into_iter().collect(),
        }
    }

    /// Store commit sequence this snapshot reflects.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Value of the named binding.
    pub fn get(&self, name: &str) -> Option<&BindingValue> {
        self.values.get(name)
    }

    /// Binding names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Iterate (name, value) pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BindingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot has no bindings.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
