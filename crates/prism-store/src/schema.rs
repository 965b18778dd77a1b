//! Relation schema and resolution.
//!
//! A [`Schema`] names the tables of a store and the relations reachable
//! from each table. Relations come in two shapes, mirroring the two ways a
//! child set hangs off a parent record:
//!
//! - [`RelationPath::HasMany`]: child rows carry a foreign-key column
//!   pointing at the parent (e.g. `category_channel.category_id`); the
//!   relation's records are the child rows themselves.
//! - [`RelationPath::ViaLink`]: link rows pair a parent key with a child
//!   key (e.g. `category_channel` pairing `category_id` and `channel_id`);
//!   the relation's records are the linked child-table rows, ordered by the
//!   link rows.
//!
//! Resolution is pure: [`Schema::resolve_relation`] turns an entity and a
//! relation name into a [`Relation`] or fails with
//! [`BindError::InvalidRelationPath`]. Whether the parent record *exists*
//! is a read-time question, answered by the store.

use indexmap::IndexMap;
use prism_core::{BindError, BindResult, ColumnName, EntityRef, TableName};

/// How a relation's member rows are found from a parent record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationPath {
    /// Child rows in `table` whose `foreign_key` column equals the parent id.
    HasMany {
        /// Table holding the child rows.
        table: TableName,
        /// Column on the child rows referencing the parent id.
        foreign_key: ColumnName,
    },
    /// Rows of `child_table` reached through link rows in `link_table`.
    ViaLink {
        /// Join table holding (parent, child) key pairs.
        link_table: TableName,
        /// Column on link rows referencing the parent id.
        link_parent_key: ColumnName,
        /// Column on link rows referencing the child id.
        link_child_key: ColumnName,
        /// Table holding the related child rows.
        child_table: TableName,
    },
}

impl RelationPath {
    /// Tables whose changes can affect this relation's membership, order,
    /// or member values. Does not include the parent's own table.
    pub fn tables(&self) -> Vec<TableName> {
        match self {
            RelationPath::HasMany { table, .. } => vec![table.clone()],
            RelationPath::ViaLink {
                link_table,
                child_table,
                ..
            } => vec![link_table.clone(), child_table.clone()],
        }
    }
}

/// One named relation on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    /// How member rows are reached.
    pub path: RelationPath,
    /// Column the member rows (for `HasMany`) or link rows (for `ViaLink`)
    /// are ordered by. `None` leaves insertion order.
    pub order_by: Option<ColumnName>,
}

/// One table and the relations reachable from it.
#[derive(Debug, Clone, Default)]
pub struct TableDef {
    relations: IndexMap<String, RelationDef>,
}

impl TableDef {
    /// A table with no relations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a `has_many` relation: child rows in `table` with
    /// `foreign_key` pointing at this table's records.
    pub fn has_many(
        mut self,
        name: impl Into<String>,
        table: impl Into<TableName>,
        foreign_key: impl Into<ColumnName>,
        order_by: Option<ColumnName>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            RelationDef {
                path: RelationPath::HasMany {
                    table: table.into(),
                    foreign_key: foreign_key.into(),
                },
                order_by,
            },
        );
        self
    }

    /// Declare a `via_link` relation: rows of `child_table` reached through
    /// link rows in `link_table`.
    #[allow(clippy::too_many_arguments)]
    pub fn via_link(
        mut self,
        name: impl Into<String>,
        link_table: impl Into<TableName>,
        link_parent_key: impl Into<ColumnName>,
        link_child_key: impl Into<ColumnName>,
        child_table: impl Into<TableName>,
        order_by: Option<ColumnName>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            RelationDef {
                path: RelationPath::ViaLink {
                    link_table: link_table.into(),
                    link_parent_key: link_parent_key.into(),
                    link_child_key: link_child_key.into(),
                    child_table: child_table.into(),
                },
                order_by,
            },
        );
        self
    }

    /// Look up a relation by name.
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }
}

/// The tables of a store and the relations reachable from each.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: IndexMap<TableName, TableDef>,
}

impl Schema {
    /// An empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table (with its relations) to the schema.
    pub fn with_table(mut self, name: impl Into<TableName>, def: TableDef) -> Self {
        self.tables.insert(name.into(), def);
        self
    }

    /// Whether `table` is declared.
    pub fn has_table(&self, table: &TableName) -> bool {
        self.tables.contains_key(table)
    }

    /// Resolve the named relation of `entity` into a queryable [`Relation`].
    pub fn resolve_relation(&self, entity: &EntityRef, name: &str) -> BindResult<Relation> {
        let table = self
            .tables
            .get(entity.table())
            .ok_or_else(|| BindError::UnknownTable(entity.table().clone()))?;
        let def = table
            .relation(name)
            .ok_or_else(|| BindError::InvalidRelationPath {
                table: entity.table().clone(),
                relation: name.to_string(),
            })?;
        Ok(Relation {
            parent: entity.clone(),
            name: name.to_string(),
            path: def.path.clone(),
            order_by: def.order_by.clone(),
        })
    }
}

/// A resolved relation: a named, possibly ordered collection of records
/// reachable from a parent entity.
///
/// Membership and ordering can change over time; the relation itself is an
/// immutable description of *how* to read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// The entity the relation hangs off.
    pub parent: EntityRef,
    /// The relation name as declared in the schema.
    pub name: String,
    /// How member rows are reached.
    pub path: RelationPath,
    /// Ordering column, if any.
    pub order_by: Option<ColumnName>,
}

impl Relation {
    /// Tables whose changes can affect this relation, including the
    /// parent's own table (a parent delete invalidates the relation).
    pub fn relevant_tables(&self) -> Vec<TableName> {
        let mut tables = self.path.tables();
        tables.push(self.parent.table().clone());
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn schema() -> Schema {
        Schema::new()
            .with_table(
                "category",
                TableDef::new()
                    .has_many(
                        "categoryChannels",
                        "category_channel",
                        "category_id",
                        Some(ColumnName::new("sort_order")),
                    )
                    .via_link(
                        "channels",
                        "category_channel",
                        "category_id",
                        "channel_id",
                        "channel",
                        Some(ColumnName::new("sort_order")),
                    ),
            )
            .with_table("channel", TableDef::new())
            .with_table("category_channel", TableDef::new())
    }

    #[test]
    fn test_resolve_has_many() {
        let s = schema();
        let category = EntityRef::new("category", "c1");
        let rel = s
            .resolve_relation(&category, "categoryChannels")
            .expect("resolves");
        assert_eq!(rel.parent, category);
        assert_matches!(
            rel.path,
            RelationPath::HasMany { ref table, .. } if table.as_str() == "category_channel"
        );
        assert_eq!(rel.order_by, Some(ColumnName::new("sort_order")));
    }

    #[test]
    fn test_resolve_via_link() {
        let s = schema();
        let rel = s
            .resolve_relation(&EntityRef::new("category", "c1"), "channels")
            .expect("resolves");
        assert_matches!(
            rel.path,
            RelationPath::ViaLink { ref child_table, .. } if child_table.as_str() == "channel"
        );
    }

    #[test]
    fn test_unknown_relation() {
        let s = schema();
        let err = s
            .resolve_relation(&EntityRef::new("category", "c1"), "nope")
            .unwrap_err();
        assert_matches!(err, BindError::InvalidRelationPath { .. });
    }

    #[test]
    fn test_unknown_table() {
        let s = schema();
        let err = s
            .resolve_relation(&EntityRef::new("nope", "x"), "channels")
            .unwrap_err();
        assert_matches!(err, BindError::UnknownTable(_));
    }

    #[test]
    fn test_relevant_tables_include_parent() {
        let s = schema();
        let rel = s
            .resolve_relation(&EntityRef::new("category", "c1"), "channels")
            .expect("resolves");
        let tables = rel.relevant_tables();
        assert!(tables.contains(&TableName::new("category_channel")));
        assert!(tables.contains(&TableName::new("channel")));
        assert!(tables.contains(&TableName::new("category")));
    }
}
