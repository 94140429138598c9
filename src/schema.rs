//! Accumulates observed `(field -> type)` pairs across a stream of flat rows,
//! resolving polymorphism into a choice type, and renders the result as DDL
//! or a serialized JSON schema (§4.3-§4.9).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dialect::{MongoDialect, NoSqlDialect, PostgresDialect, SqlDialect};
use crate::error::RelationalizeError;
use crate::types::{classify_value, BaseType, ColumnType};

/// One schema entry: the field's inferred type and whether it was detected
/// as the document's natural primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub ty: ColumnType,
    pub is_primary: bool,
}

/// Default allow-set for [`Schema::drop_special_char_columns`]: ASCII
/// alphanumerics are always allowed; these are allowed in addition.
pub const DEFAULT_ALLOWED_CHARS: &[char] = &[' ', '-', '_'];

/// Options for [`Schema::generate_ddl`].
#[derive(Debug, Clone)]
pub struct DdlOptions {
    pub schema: String,
    pub schema_qualified: bool,
}

impl Default for DdlOptions {
    fn default() -> Self {
        DdlOptions {
            schema: "public".to_string(),
            schema_qualified: true,
        }
    }
}

/// Accumulated `field -> type` mapping for a single table, built by repeated
/// calls to [`Schema::read_object`] over that table's flat rows.
pub struct Schema {
    fields: IndexMap<String, FieldSchema>,
    source_dialect: Box<dyn NoSqlDialect>,
    sql_dialect: Box<dyn SqlDialect>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema").field("fields", &self.fields).finish()
    }
}

impl Clone for Schema {
    fn clone(&self) -> Self {
        Schema {
            fields: self.fields.clone(),
            source_dialect: self.source_dialect.clone(),
            sql_dialect: self.sql_dialect.clone(),
        }
    }
}

impl PartialEq for Schema {
    /// Equality is defined over the observed field map only: the configured
    /// dialects are behavior, not data, and two schemas with the same fields
    /// but different dialects are still "the same schema" for the purposes
    /// of the §8 round-trip invariant.
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Default for Schema {
    fn default() -> Self {
        Schema {
            fields: IndexMap::new(),
            source_dialect: Box::new(MongoDialect),
            sql_dialect: Box::new(PostgresDialect),
        }
    }
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn with_source_dialect(mut self, dialect: Box<dyn NoSqlDialect>) -> Self {
        self.source_dialect = dialect;
        self
    }

    pub fn with_sql_dialect(mut self, dialect: Box<dyn SqlDialect>) -> Self {
        self.sql_dialect = dialect;
        self
    }

    pub fn fields(&self) -> &IndexMap<String, FieldSchema> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Observes one flat row, updating the schema per the §4.3 merge rules.
    pub fn read_object(&mut self, row: &Map<String, Value>) {
        for (key, value) in row {
            let classified = classify_value(value);
            if let ColumnType::Unsupported(desc) = &classified {
                tracing::warn!(field = %key, kind = %desc, "dropping field with unsupported type");
                continue;
            }
            match self.fields.get_mut(key) {
                None => {
                    let is_primary = self.source_dialect.is_primary_key(key);
                    self.fields.insert(key.clone(), FieldSchema { ty: classified, is_primary });
                }
                Some(existing) => {
                    existing.ty = existing.ty.merge(&classified);
                }
            }
        }
    }

    /// Merges a set of schemas built independently (e.g. one per shard) into
    /// one. The first schema supplies the base dialects and `is_primary`
    /// precedence; later schemas' fields are inserted or type-unioned.
    pub fn merge(schemas: &[Schema]) -> Schema {
        let mut iter = schemas.iter();
        let Some(first) = iter.next() else {
            return Schema::default();
        };
        let mut result = first.clone();
        for schema in iter {
            for (key, incoming) in &schema.fields {
                match result.fields.get_mut(key) {
                    None => {
                        result.fields.insert(key.clone(), incoming.clone());
                    }
                    Some(existing) => {
                        existing.ty = existing.ty.merge(&incoming.ty);
                    }
                }
            }
        }
        result
    }

    /// Projects a single flat row against this schema, splitting choice
    /// columns into their `k_<type>` sub-columns (§4.4).
    pub fn convert_object(&self, row: &Map<String, Value>) -> Result<Map<String, Value>, RelationalizeError> {
        let mut out = Map::new();
        // Iterate whichever side is smaller to keep this O(min(|schema|, |row|)).
        if self.fields.len() <= row.len() {
            for (key, field) in &self.fields {
                let Some(value) = row.get(key) else { continue };
                self.project_field(key, field, value, &mut out)?;
            }
        } else {
            for (key, value) in row {
                let Some(field) = self.fields.get(key) else { continue };
                self.project_field(key, field, value, &mut out)?;
            }
        }
        Ok(out)
    }

    fn project_field(
        &self,
        key: &str,
        field: &FieldSchema,
        value: &Value,
        out: &mut Map<String, Value>,
    ) -> Result<(), RelationalizeError> {
        if value.is_null() {
            out.insert(key.to_string(), Value::Null);
            return Ok(());
        }
        if !field.ty.is_choice() {
            out.insert(key.to_string(), value.clone());
            return Ok(());
        }
        let value_type = classify_value(value);
        let base = match &value_type {
            ColumnType::Base(b) => *b,
            _ => {
                return Err(RelationalizeError::SchemaInconsistency {
                    key: key.to_string(),
                    schema_type: field.ty.clone(),
                    value_type,
                })
            }
        };
        if !field.ty.contains(base) {
            return Err(RelationalizeError::SchemaInconsistency {
                key: key.to_string(),
                schema_type: field.ty.clone(),
                value_type,
            });
        }
        out.insert(format!("{key}_{base}"), value.clone());
        Ok(())
    }

    /// Drops every field whose accumulated type is still `none` (never
    /// observed a non-null value). Returns the number of columns removed.
    pub fn drop_null_columns(&mut self) -> usize {
        let before = self.fields.len();
        self.fields.retain(|_, f| !f.ty.is_none());
        let removed = before - self.fields.len();
        if removed > 0 {
            tracing::info!(removed, "dropped all-null columns");
        }
        removed
    }

    /// Drops fields whose name contains a character outside `[A-Za-z0-9]`
    /// plus `allowed` (defaults to space, hyphen, underscore).
    pub fn drop_special_char_columns(&mut self, allowed: &[char]) -> usize {
        let before = self.fields.len();
        self.fields.retain(|name, _| {
            name.chars().all(|c| c.is_ascii_alphanumeric() || allowed.contains(&c))
        });
        let removed = before - self.fields.len();
        if removed > 0 {
            tracing::info!(removed, "dropped columns with disallowed characters");
        }
        removed
    }

    /// Retains only the first field of each case-insensitive equivalence
    /// class of names.
    pub fn drop_duplicate_columns(&mut self) -> usize {
        let before = self.fields.len();
        let mut seen = std::collections::HashSet::new();
        self.fields.retain(|name, _| seen.insert(name.to_ascii_lowercase()));
        let removed = before - self.fields.len();
        if removed > 0 {
            tracing::info!(removed, "dropped case-insensitive duplicate columns");
        }
        removed
    }

    /// The full, lexicographically sorted list of materialized columns:
    /// one per non-choice field, one per member (excluding `none`) of every
    /// choice field (§4.5).
    pub fn generate_output_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .fields
            .iter()
            .flat_map(|(name, field)| match &field.ty {
                ColumnType::Base(_) => vec![name.clone()],
                ColumnType::Choice(members) => members
                    .iter()
                    .filter(|b| **b != BaseType::None)
                    .map(|b| format!("{name}_{b}"))
                    .collect(),
                ColumnType::Unsupported(_) => vec![],
            })
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    /// Renders a `CREATE TABLE` statement for `table` through the
    /// configured [`SqlDialect`] (§4.7).
    pub fn generate_ddl(&self, table: &str, options: &DdlOptions) -> String {
        let primary_count = self.fields.values().filter(|f| f.is_primary).count();
        match primary_count {
            0 => tracing::info!(table, "schema has no primary key column"),
            1 => {}
            n => tracing::warn!(table, count = n, "schema has more than one primary key column"),
        }

        let mut columns = Vec::new();
        for (name, field) in &self.fields {
            if field.ty.is_choice() {
                tracing::info!(table, field = %name, "field has a polymorphic (choice) type");
            }
            match &field.ty {
                ColumnType::Base(BaseType::None) => {
                    tracing::info!(table, field = %name, "all-null column materialized as BOOLEAN");
                    columns.push(self.sql_dialect.generate_ddl_column(name, self.sql_dialect.column_type(BaseType::None), field.is_primary));
                }
                ColumnType::Base(b) => {
                    columns.push(self.sql_dialect.generate_ddl_column(name, self.sql_dialect.column_type(*b), field.is_primary));
                }
                ColumnType::Choice(members) => {
                    for b in members.iter().filter(|b| **b != BaseType::None) {
                        let sub_name = format!("{name}_{b}");
                        columns.push(self.sql_dialect.generate_ddl_column(&sub_name, self.sql_dialect.column_type(*b), field.is_primary));
                    }
                }
                ColumnType::Unsupported(_) => {}
            }
        }
        columns.sort();
        self.sql_dialect.generate_ddl(&options.schema, table, &columns, options.schema_qualified)
    }

    /// Serializes the observed `{field: {type, is_primary}}` mapping as JSON.
    pub fn serialize(&self) -> Result<String, RelationalizeError> {
        Ok(serde_json::to_string(&self.fields)?)
    }

    /// Inverts [`Schema::serialize`]; the resulting schema uses default
    /// dialects (Mongo/Postgres) since dialects are not part of the wire
    /// format.
    pub fn deserialize(s: &str) -> Result<Schema, RelationalizeError> {
        let fields: IndexMap<String, FieldSchema> = serde_json::from_str(s)?;
        Ok(Schema { fields, ..Schema::default() })
    }
}
