//! The bundled output collaborator (§6): a `RowSink` that writes each
//! table's rows as newline-delimited JSON into its own file. This is the
//! CLI's default sink; callers embedding the library may supply their own
//! `RowSink` instead (files, object storage, a channel, ...).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::RelationalizeError;

/// The output collaborator the core depends on but does not implement
/// (§1, §6): accepts one `(table_name, row)` write at a time.
pub trait RowSink {
    fn write_row(&mut self, table: &str, row: &Map<String, Value>) -> Result<(), RelationalizeError>;
}

/// Writes each table to `<base_dir>/<table>.ndjson`, opening files lazily on
/// first write and keeping them open for the lifetime of the sink. Flushes
/// (but does not need to explicitly close, since `File`'s `Drop` does that)
/// every open writer when the sink itself is dropped, so a caller that lets
/// the `Relationalizer` and its sink go out of scope on any exit path -
/// success, early return, or panic unwinding - still gets durable output.
pub struct FileSink {
    base_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl FileSink {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FileSink { base_dir: base_dir.into(), writers: HashMap::new() }
    }

    fn writer_for(&mut self, table: &str) -> Result<&mut BufWriter<File>, RelationalizeError> {
        if !self.writers.contains_key(table) {
            let path = self.table_path(table);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.writers.insert(table.to_string(), BufWriter::new(file));
        }
        Ok(self.writers.get_mut(table).expect("just inserted"))
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.base_dir.join(format!("{table}.ndjson"))
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.writers.keys().map(String::as_str)
    }
}

impl RowSink for FileSink {
    fn write_row(&mut self, table: &str, row: &Map<String, Value>) -> Result<(), RelationalizeError> {
        let writer = self.writer_for(table)?;
        serde_json::to_writer(&mut *writer, row)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        for (table, writer) in self.writers.iter_mut() {
            if let Err(e) = writer.flush() {
                tracing::warn!(table, error = %e, "failed to flush sink on drop");
            }
        }
    }
}

/// Reads a directory previously populated by [`FileSink`] back out, one
/// table at a time, for the CLI's second (schema-inference) pass.
pub fn read_ndjson_file(path: &Path) -> Result<Vec<Map<String, Value>>, RelationalizeError> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let value: Value = serde_json::from_str(line)?;
            match value {
                Value::Object(map) => Ok(map),
                other => Err(RelationalizeError::NotAnObject(type_name(&other))),
            }
        })
        .collect()
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
