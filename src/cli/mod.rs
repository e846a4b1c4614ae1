//! CLI module for aeropipe
//!
//! Provides command-line interface for:
//! - aggregate: Run a pipeline over a document file
//! - explain: Show the access plan for a pipeline
//! - decode-frames: Print the documents of a frame file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, RunArgs};
pub use commands::{aggregate_to, explain, load_config, run, run_command, Output, INPUT_COLLECTION};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_documents, read_frames, read_json, write_document, write_frame};
