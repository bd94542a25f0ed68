//! The closed-world configuration a compile runs against: declared tables, their fields,
//! the relationships that joins are discovered over, bound variables, and the dialect to
//! target. Mirrors `chisel_snapshot::schema::Schema`'s shape and serde conventions, except
//! that a table here is a flat, already-normalized `TableSchema` rather than a TypeScript
//! `Entity` — expanding relationships out of foreign keys is an out-of-scope external
//! collaborator's job (spec §1).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    Postgresql,
    SqliteExtensions,
}

impl Dialect {
    pub fn is_sqlite(self) -> bool {
        matches!(self, Dialect::SqliteExtensions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Uuid,
    String,
    Number,
    Boolean,
    Datetime,
    Date,
    Object,
}

/// A single column of a [`TableSchema`].
///
/// `default`, when present, is a raw JSON-encoded `Expression` (the `compiler` crate's
/// concern to parse) rather than a typed `Expression` value: `schema` has no dependency on
/// `compiler`, and a default expression is only ever interpreted at mutation-compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// An ordered, name-unique set of fields. Field order is preserved because it governs the
/// default column order of `INSERT`/projection emission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(with = "fields_as_vec")]
    pub fields: IndexMap<String, Field>,
}

impl TableSchema {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        let fields = fields.into_iter().map(|f| (f.name.clone(), f)).collect();
        TableSchema { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }
}

mod fields_as_vec {
    use super::Field;
    use indexmap::IndexMap;
    use serde::de::{Deserialize, Deserializer};
    use serde::ser::{Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        fields: &IndexMap<String, Field>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let vec: Vec<&Field> = fields.values().collect();
        vec.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IndexMap<String, Field>, D::Error> {
        let vec = Vec::<Field>::deserialize(deserializer)?;
        Ok(vec.into_iter().map(|f| (f.name.clone(), f)).collect())
    }
}

/// A directional link from `table.field` to `to_table.to_field`. The planner treats
/// relationships symmetrically: either endpoint may be the "current table" of a join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub table: String,
    pub field: String,
    pub to_table: String,
    pub to_field: String,
}

impl Relationship {
    /// Returns `(local_field, remote_table, remote_field)` if this relationship links
    /// `from_table` to some other table, checking both directions since joins are
    /// discovered symmetrically.
    pub fn endpoint_from(&self, from_table: &str, to_table: &str) -> Option<(&str, &str)> {
        if self.table == from_table && self.to_table == to_table {
            Some((self.field.as_str(), self.to_field.as_str()))
        } else if self.to_table == from_table && self.table == to_table {
            Some((self.to_field.as_str(), self.field.as_str()))
        } else {
            None
        }
    }
}

/// Configuration for the data-table rewriter (spec §4.I): the physical table that stores
/// many logical tables as JSON documents, plus the discriminator column and any
/// always-injected raw SQL predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTableConfig {
    pub table: String,
    pub data_field: String,
    pub table_field: String,
    #[serde(default)]
    pub where_conditions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub dialect: Dialect,
    pub tables: IndexMap<String, TableSchema>,
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_table: Option<DataTableConfig>,
}

impl Config {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Relationships between `table_a` and `table_b`, in either direction.
    pub fn relationships_between<'a>(
        &'a self,
        table_a: &'a str,
        table_b: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.relationships
            .iter()
            .filter_map(move |r| r.endpoint_from(table_a, table_b))
    }
}
