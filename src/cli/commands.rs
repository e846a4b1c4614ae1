//! CLI command implementations
//!
//! Each command builds a fresh [`Database`], loads the input documents into
//! one collection, creates the requested indexes and then runs or explains
//! the pipeline. Nothing outlives the process.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::collection::{Collection, Database};
use crate::config::EngineConfig;
use crate::index::IndexOptions;
use crate::observability::{log_event, Event};
use crate::pipeline::{AggregateOptions, Pipeline};
use crate::planner::{ExplainPlan, Hint};
use crate::value::{document_from_json, Document, JsonMode};

use super::args::{Cli, Command, RunArgs};
use super::errors::{CliError, CliResult};
use super::io::{read_documents, read_frames, read_json, write_document, write_frame};

/// Collection the input documents are loaded into
pub const INPUT_COLLECTION: &str = "input";

/// Main CLI entry point
///
/// Parses arguments, installs the log subscriber and dispatches to the
/// command. This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    init_tracing();
    run_command(cli.command)
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`)
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Aggregate {
            run,
            canonical,
            frames,
        } => {
            let mode = if canonical {
                JsonMode::Canonical
            } else {
                JsonMode::Relaxed
            };
            match frames {
                Some(path) => {
                    let file = File::create(&path).map_err(|e| {
                        CliError::io_error(format!("failed to create {}: {}", path.display(), e))
                    })?;
                    let mut out = BufWriter::new(file);
                    aggregate_to(&run, Output::Frames, &mut out)?;
                    out.flush()?;
                }
                None => {
                    let stdout = io::stdout();
                    let mut out = stdout.lock();
                    aggregate_to(&run, Output::Json(mode), &mut out)?;
                    out.flush()?;
                }
            }
            Ok(())
        }
        Command::Explain { run, json } => {
            let plan = explain(&run)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if json {
                write_document(&mut out, &plan.to_document(), JsonMode::Relaxed)?;
            } else {
                write!(out, "{}", plan)?;
            }
            out.flush()?;
            Ok(())
        }
        Command::DecodeFrames { input, canonical } => {
            let mode = if canonical {
                JsonMode::Canonical
            } else {
                JsonMode::Relaxed
            };
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for doc in read_frames(&input)? {
                write_document(&mut out, &doc, mode)?;
            }
            out.flush()?;
            Ok(())
        }
    }
}

/// How `aggregate` writes its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Json(JsonMode),
    Frames,
}

/// Load configuration from `path`, or defaults when absent
pub fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let config = match path {
        Some(path) => {
            let config =
                EngineConfig::load(path).map_err(|e| CliError::config_error(e.to_string()))?;
            let source = path.display().to_string();
            log_event(Event::ConfigLoaded, &[("path", source.as_str())]);
            config
        }
        None => EngineConfig::default(),
    };
    Ok(config)
}

/// Create every index listed in an index file
fn create_indexes(collection: &Collection, path: &Path) -> CliResult<()> {
    let json = read_json(path)?;
    let entries = json
        .as_array()
        .ok_or_else(|| CliError::input_error("index file must hold a JSON array"))?;
    for (position, entry) in entries.iter().enumerate() {
        let entry = document_from_json(entry)?;
        let key = entry
            .get("key")
            .and_then(|k| k.as_document())
            .ok_or_else(|| {
                CliError::input_error(format!("index entry {} needs a \"key\" object", position))
            })?;
        let options = match entry.get("options").and_then(|o| o.as_document()) {
            Some(options) => IndexOptions::from_document(options)?,
            None => IndexOptions::default(),
        };
        collection.create_index(key, options)?;
    }
    Ok(())
}

fn aggregate_options(run: &RunArgs) -> AggregateOptions {
    let mut options = AggregateOptions::default();
    if run.collscan {
        options = options.hint(Hint::CollectionScan);
    } else if let Some(name) = &run.hint {
        options = options.hint(Hint::Index(name.clone()));
    }
    options
}

/// Open a database holding the input collection, and parse the pipeline
fn prepare(run: &RunArgs) -> CliResult<(Database, Collection, Pipeline)> {
    let config = load_config(run.config.as_deref())?;
    let database = Database::open(config)?;
    let collection = database.collection(INPUT_COLLECTION)?;

    let docs = read_documents(&run.input)?;
    let result = collection.insert_many(docs, true);
    if let Some(failure) = result.write_errors.first() {
        return Err(CliError::input_error(format!(
            "input document {} rejected: {}",
            failure.index, failure.error
        )));
    }
    if let Some(path) = &run.indexes {
        create_indexes(&collection, path)?;
    }

    let pipeline = Pipeline::from_json(&read_json(&run.pipeline)?)?;
    Ok((database, collection, pipeline))
}

fn emit<W: Write>(out: &mut W, doc: &Document, output: Output) -> CliResult<()> {
    match output {
        Output::Json(mode) => write_document(out, doc, mode),
        Output::Frames => write_frame(out, doc),
    }
}

/// Run the pipeline and write its output; returns the documents written.
///
/// When the pipeline ends in `$out`, the target collection is written
/// instead.
pub fn aggregate_to<W: Write>(run: &RunArgs, output: Output, out: &mut W) -> CliResult<u64> {
    let (database, collection, pipeline) = prepare(run)?;
    let mut cursor = collection.aggregate(&pipeline, &aggregate_options(run))?;

    let mut written = 0;
    for doc in cursor.by_ref() {
        emit(out, &doc?, output)?;
        written += 1;
    }
    for diagnostic in cursor.diagnostics() {
        let what = if diagnostic.dropped {
            "skipped document"
        } else {
            "ignored operand"
        };
        eprintln!(
            "{} in {}: {}: {}",
            what,
            diagnostic.stage,
            diagnostic.code.code(),
            diagnostic.message
        );
    }
    drop(cursor);

    if let Some(target) = pipeline.out_target() {
        if let Some(target) = database.get_collection(target) {
            for doc in target.documents() {
                emit(out, &doc, output)?;
                written += 1;
            }
        }
    }
    database.close();
    Ok(written)
}

/// Plan the pipeline without running it
pub fn explain(run: &RunArgs) -> CliResult<ExplainPlan> {
    let (database, collection, pipeline) = prepare(run)?;
    let plan = collection.explain(&pipeline, &aggregate_options(run))?;
    database.close();
    Ok(plan)
}
