//! The crate's single error type. Every fallible operation in `relationalize`
//! returns `Result<T, RelationalizeError>` so callers can match on variants
//! instead of parsing strings (§7 of the design doc).

use crate::types::ColumnType;

#[derive(Debug, thiserror::Error)]
pub enum RelationalizeError {
    /// A value's runtime type is not a member of the schema's declared
    /// choice for this field. Raised by `Schema::convert_object`.
    #[error("field {key:?} has value of type {value_type} but schema declares {schema_type}")]
    SchemaInconsistency {
        key: String,
        schema_type: ColumnType,
        value_type: ColumnType,
    },

    /// An input document used a reserved system column name as a genuine key.
    #[error("document contains reserved column {0:?}")]
    ReservedColumn(String),

    /// The top-level value handed to `Relationalizer::relationalize` was not
    /// a JSON object.
    #[error("expected a JSON object at the document root, found {0}")]
    NotAnObject(&'static str),

    /// The output sink (a caller-supplied writer or the bundled file sink)
    /// failed. Propagated unchanged; the relationalizer never retries.
    #[error("sink error: {0}")]
    Sink(#[source] std::io::Error),

    /// A row or schema failed to round-trip through JSON.
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}

impl From<std::io::Error> for RelationalizeError {
    fn from(e: std::io::Error) -> Self {
        RelationalizeError::Sink(e)
    }
}

impl From<serde_json::Error> for RelationalizeError {
    fn from(e: serde_json::Error) -> Self {
        RelationalizeError::Serialization(e)
    }
}
