use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use relationalize::dialect::{NoSqlDialectKind, SqlDialectKind};
use relationalize::schema::DdlOptions;
use relationalize::sink::{read_ndjson_file, FileSink};
use relationalize::{RelationalizerConfig, Schema};

#[derive(Parser, Debug)]
#[command(name = "relationalize")]
#[command(bin_name = "relationalize")]
#[command(about = "Flattens JSON document streams into flat relational tables with polymorphic schema inference")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Relationalizes a document stream and infers + emits a schema and DDL for every table produced.
    Run(RunArgs),
    /// Re-emits DDL from a previously serialized schema, without re-reading any documents.
    Ddl(DdlArgs),
    /// Merges several previously serialized schemas (e.g. one per shard) into one.
    SchemaMerge(SchemaMergeArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Name of the root table; subordinate tables are named `<name>_<path>`.
    #[arg(long, short = 't')]
    table: String,
    /// Newline-delimited JSON input file. Reads stdin if omitted.
    #[arg(long, short = 'i')]
    input: Option<PathBuf>,
    /// Directory that table NDJSON files, schema JSON, and DDL are written into.
    #[arg(long, short = 'o')]
    output_dir: PathBuf,
    /// Render arrays as a JSON string instead of splitting them into a subordinate table.
    #[arg(long)]
    stringify_arrays: bool,
    /// Render nested objects as a JSON string instead of flattening them.
    #[arg(long)]
    stringify_objects: bool,
    #[command(flatten)]
    dialects: DialectArgs,
    #[command(flatten)]
    ddl: DdlArgsShared,
    /// Drop columns whose observed type is always `none`.
    #[arg(long)]
    drop_null_columns: bool,
    /// Drop columns whose name contains a character outside [A-Za-z0-9 _-].
    #[arg(long)]
    drop_special_char_columns: bool,
    /// Drop case-insensitive duplicate columns, keeping the first.
    #[arg(long)]
    drop_duplicate_columns: bool,
}

#[derive(clap::Args, Debug)]
struct DialectArgs {
    /// Source document convention used to detect each table's natural primary key.
    #[arg(long, value_enum, default_value = "mongo")]
    source_dialect: NoSqlDialectKind,
    /// Target SQL dialect DDL is rendered for.
    #[arg(long, value_enum, default_value = "postgres")]
    sql_dialect: SqlDialectKind,
}

#[derive(clap::Args, Debug)]
struct DdlArgsShared {
    /// SQL schema name tables are created under.
    #[arg(long, default_value = "public")]
    schema: String,
    /// Qualify table names with `schema` in the emitted DDL.
    #[arg(long, default_value_t = true)]
    schema_qualified: bool,
}

#[derive(clap::Args, Debug)]
struct DdlArgs {
    /// Path to a schema JSON file previously written by `run` or `schema-merge`.
    #[arg(long, short = 's')]
    schema_file: PathBuf,
    /// Table name to substitute into the DDL template.
    #[arg(long, short = 't')]
    table: String,
    /// Target SQL dialect DDL is rendered for.
    #[arg(long, value_enum, default_value = "postgres")]
    sql_dialect: SqlDialectKind,
    #[command(flatten)]
    ddl: DdlArgsShared,
}

#[derive(clap::Args, Debug)]
struct SchemaMergeArgs {
    /// Schema JSON files to merge, in order (later files only add to or widen the first).
    #[arg(required = true)]
    schema_files: Vec<PathBuf>,
    /// Where to write the merged schema JSON.
    #[arg(long, short = 'o')]
    output: PathBuf,
}

fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        CliCommand::Run(args) => run_relationalize(args),
        CliCommand::Ddl(args) => run_ddl(args),
        CliCommand::SchemaMerge(args) => run_schema_merge(args),
    }
}

fn read_documents(input: &Option<PathBuf>) -> Result<Vec<serde_json::Value>> {
    let text = match input {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            buf
        }
    };
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).with_context(|| format!("parsing input line: {line}")))
        .collect()
}

fn run_relationalize(args: RunArgs) -> Result<()> {
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output directory {}", args.output_dir.display()))?;

    let documents = read_documents(&args.input)?;
    tracing::info!(count = documents.len(), "read documents");

    let sink = FileSink::new(&args.output_dir);
    let config = RelationalizerConfig {
        stringify_arrays: args.stringify_arrays,
        stringify_objects: args.stringify_objects,
    };
    let mut relationalizer = relationalize::Relationalizer::new(args.table.clone(), sink).with_config(config);
    relationalizer.relationalize_all(documents)?;
    // Dropping the relationalizer flushes and releases every table's file handle
    // before the second pass below re-reads those same files.
    drop(relationalizer);

    let tables = tables_in_dir(&args.output_dir)?;
    for table in tables {
        let rows = read_ndjson_file(&args.output_dir.join(format!("{table}.ndjson")))?;
        let mut schema = Schema::new()
            .with_source_dialect(args.dialects.source_dialect.build())
            .with_sql_dialect(args.dialects.sql_dialect.build());
        for row in &rows {
            schema.read_object(row);
        }
        if args.drop_null_columns {
            schema.drop_null_columns();
        }
        if args.drop_special_char_columns {
            schema.drop_special_char_columns(relationalize::schema::DEFAULT_ALLOWED_CHARS);
        }
        if args.drop_duplicate_columns {
            schema.drop_duplicate_columns();
        }

        let schema_path = args.output_dir.join(format!("{table}.schema.json"));
        fs::write(&schema_path, schema.serialize()?).with_context(|| format!("writing {}", schema_path.display()))?;

        let ddl_options = DdlOptions {
            schema: args.ddl.schema.clone(),
            schema_qualified: args.ddl.schema_qualified,
        };
        let ddl_path = args.output_dir.join(format!("{table}.ddl.sql"));
        fs::write(&ddl_path, schema.generate_ddl(&table, &ddl_options)).with_context(|| format!("writing {}", ddl_path.display()))?;

        eprintln!("{table}: {} rows, {} columns", rows.len(), schema.generate_output_columns().len());
    }

    Ok(())
}

fn tables_in_dir(dir: &std::path::Path) -> Result<BTreeSet<String>> {
    let mut tables = BTreeSet::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading directory {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("ndjson") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tables.insert(stem.to_string());
            }
        }
    }
    Ok(tables)
}

fn run_ddl(args: DdlArgs) -> Result<()> {
    let text = fs::read_to_string(&args.schema_file).with_context(|| format!("reading {}", args.schema_file.display()))?;
    let schema = Schema::deserialize(&text)
        .map(|s| s.with_sql_dialect(args.sql_dialect.build()))
        .with_context(|| format!("parsing schema in {}", args.schema_file.display()))?;
    let ddl_options = DdlOptions {
        schema: args.ddl.schema,
        schema_qualified: args.ddl.schema_qualified,
    };
    println!("{}", schema.generate_ddl(&args.table, &ddl_options));
    Ok(())
}

fn run_schema_merge(args: SchemaMergeArgs) -> Result<()> {
    if args.schema_files.is_empty() {
        bail!("schema-merge requires at least one --schema file");
    }
    let mut schemas = Vec::with_capacity(args.schema_files.len());
    for path in &args.schema_files {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        schemas.push(Schema::deserialize(&text).with_context(|| format!("parsing schema in {}", path.display()))?);
    }
    let merged = Schema::merge(&schemas);
    fs::write(&args.output, merged.serialize()?).with_context(|| format!("writing {}", args.output.display()))?;
    Ok(())
}
