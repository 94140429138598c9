//! Target SQL dialects (§4.8) and source-side NoSQL dialects (§4.9).
//!
//! Both are small trait objects rather than an enum-of-dialects: the point
//! of the split is that a caller embedding this crate can plug in a dialect
//! this crate never shipped without touching `Schema`.

use crate::types::BaseType;

/// Maps lattice types to concrete column tokens and formats DDL for one SQL
/// engine family.
pub trait SqlDialect: std::fmt::Debug {
    /// The column type token for a base lattice type, e.g. `"INT"`.
    fn column_type(&self, ty: BaseType) -> &'static str;

    /// Quotes (and escapes) a bare identifier for this dialect.
    fn quote_identifier(&self, ident: &str) -> String;

    /// The clause appended to a column definition that is the table's
    /// primary key, e.g. `"PRIMARY KEY"`.
    fn primary_key_clause(&self) -> &'static str;

    /// Renders one column definition within a `CREATE TABLE`.
    fn generate_ddl_column(&self, name: &str, ty: &str, is_primary: bool) -> String {
        let quoted = self.quote_identifier(name);
        if is_primary {
            format!("{quoted} {ty} {}", self.primary_key_clause())
        } else {
            format!("{quoted} {ty}")
        }
    }

    /// Renders the full `CREATE TABLE` statement given an already-sorted
    /// list of rendered column definitions.
    fn generate_ddl(&self, schema: &str, table: &str, columns: &[String], schema_qualified: bool) -> String;

    fn box_clone(&self) -> Box<dyn SqlDialect>;
}

impl Clone for Box<dyn SqlDialect> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Postgres (and Postgres-wire-compatible warehouses such as Redshift).
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn column_type(&self, ty: BaseType) -> &'static str {
        match ty {
            BaseType::None | BaseType::Bool => "BOOLEAN",
            BaseType::Int => "INT",
            BaseType::BigInt => "BIGINT",
            BaseType::Float => "FLOAT",
            BaseType::Str => "TEXT",
            BaseType::Datetime => "TIMESTAMP",
            BaseType::DatetimeTz => "TIMESTAMPTZ",
        }
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn primary_key_clause(&self) -> &'static str {
        "PRIMARY KEY"
    }

    fn generate_ddl(&self, schema: &str, table: &str, columns: &[String], schema_qualified: bool) -> String {
        let name = if schema_qualified {
            format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(table))
        } else {
            self.quote_identifier(table)
        };
        format!("CREATE TABLE IF NOT EXISTS {name} (\n    {}\n);", columns.join(",\n    "))
    }

    fn box_clone(&self) -> Box<dyn SqlDialect> {
        Box::new(*self)
    }
}

/// Flink SQL (and other engines that share its `CREATE TABLE` grammar, e.g.
/// streaming catalogs that require `NOT ENFORCED` primary keys).
#[derive(Debug, Clone, Copy, Default)]
pub struct FlinkDialect;

impl SqlDialect for FlinkDialect {
    fn column_type(&self, ty: BaseType) -> &'static str {
        match ty {
            BaseType::None | BaseType::Bool => "BOOLEAN",
            BaseType::Int => "INT",
            BaseType::BigInt => "BIGINT",
            BaseType::Float => "FLOAT",
            BaseType::Str => "STRING",
            BaseType::Datetime => "TIMESTAMP",
            BaseType::DatetimeTz => "TIMESTAMP_LTZ",
        }
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn primary_key_clause(&self) -> &'static str {
        "PRIMARY KEY NOT ENFORCED"
    }

    fn generate_ddl(&self, schema: &str, table: &str, columns: &[String], schema_qualified: bool) -> String {
        let name = if schema_qualified {
            format!("`{schema}.{table}`")
        } else {
            self.quote_identifier(table)
        };
        format!("CREATE TABLE IF NOT EXISTS {name} (\n    {}\n);", columns.join(",\n    "))
    }

    fn box_clone(&self) -> Box<dyn SqlDialect> {
        Box::new(*self)
    }
}

/// CLI/config-facing selector for the built-in [`SqlDialect`] impls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SqlDialectKind {
    /// Postgres and Postgres-wire-compatible warehouses.
    Postgres,
    /// Flink SQL catalogs.
    Flink,
}

impl SqlDialectKind {
    pub fn build(self) -> Box<dyn SqlDialect> {
        match self {
            SqlDialectKind::Postgres => Box::new(PostgresDialect),
            SqlDialectKind::Flink => Box::new(FlinkDialect),
        }
    }
}

impl Default for SqlDialectKind {
    fn default() -> Self {
        SqlDialectKind::Postgres
    }
}

/// Decides whether a field name is the document's natural primary key,
/// per the originating document store's own conventions (§4.9).
pub trait NoSqlDialect: std::fmt::Debug {
    fn is_primary_key(&self, field_name: &str) -> bool;

    fn box_clone(&self) -> Box<dyn NoSqlDialect>;
}

impl Clone for Box<dyn NoSqlDialect> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// MongoDB's convention: the document's natural key is always named `_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDialect;

impl NoSqlDialect for MongoDialect {
    fn is_primary_key(&self, field_name: &str) -> bool {
        field_name == "_id"
    }

    fn box_clone(&self) -> Box<dyn NoSqlDialect> {
        Box::new(*self)
    }
}

/// CLI/config-facing selector for the built-in [`NoSqlDialect`] impls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum NoSqlDialectKind {
    Mongo,
}

impl NoSqlDialectKind {
    pub fn build(self) -> Box<dyn NoSqlDialect> {
        match self {
            NoSqlDialectKind::Mongo => Box::new(MongoDialect),
        }
    }
}

impl Default for NoSqlDialectKind {
    fn default() -> Self {
        NoSqlDialectKind::Mongo
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn postgres_quotes_and_doubles_embedded_quotes() {
        let d = PostgresDialect;
        assert_eq!(d.quote_identifier("table"), "\"table\"");
        assert_eq!(d.quote_identifier("weird\"name"), "\"weird\"\"name\"");
    }

    #[test]
    fn postgres_ddl_template() {
        let d = PostgresDialect;
        let columns = vec!["\"a\" INT".to_string(), "\"b\" TEXT".to_string()];
        let ddl = d.generate_ddl("public", "test", &columns, true);
        assert_eq!(ddl, "CREATE TABLE IF NOT EXISTS \"public\".\"test\" (\n    \"a\" INT,\n    \"b\" TEXT\n);");
    }

    #[test]
    fn flink_quotes_with_backticks_and_composite_name() {
        let d = FlinkDialect;
        assert_eq!(d.quote_identifier("t"), "`t`");
        let columns = vec!["`a` INT".to_string()];
        let ddl = d.generate_ddl("public", "test", &columns, true);
        assert_eq!(ddl, "CREATE TABLE IF NOT EXISTS `public.test` (\n    `a` INT\n);");
    }

    #[test]
    fn mongo_dialect_detects_id_field() {
        let d = MongoDialect;
        assert!(d.is_primary_key("_id"));
        assert!(!d.is_primary_key("not_id"));
    }
}
