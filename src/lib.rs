//! `relationalize` turns a stream of semi-structured JSON documents into a
//! family of flat relational tables with polymorphic schema inference and
//! SQL DDL emission.
//!
//! The crate is organized leaf-first:
//! - [`types`] - the column type lattice and scalar classification.
//! - [`dialect`] - pluggable target SQL dialects and source NoSQL dialects.
//! - [`schema`] - accumulates observed types per column, emits DDL.
//! - [`relationalizer`] - the streaming tree-to-tables transform.
//! - [`sink`] - the `RowSink` contract and the bundled NDJSON file sink.
//! - [`error`] - the crate's single error type.

pub mod dialect;
pub mod error;
pub mod relationalizer;
pub mod schema;
pub mod sink;
pub mod types;

pub use dialect::{MongoDialect, NoSqlDialect, NoSqlDialectKind, PostgresDialect, FlinkDialect, SqlDialect, SqlDialectKind};
pub use error::RelationalizeError;
pub use relationalizer::{Relationalizer, RelationalizerConfig};
pub use schema::{DdlOptions, FieldSchema, Schema};
pub use sink::{FileSink, RowSink};
pub use types::{BaseType, ColumnType};
