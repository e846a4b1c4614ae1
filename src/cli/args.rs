//! CLI argument definitions using clap
//!
//! Commands:
//! - aeropipe aggregate --input <docs> --pipeline <pipeline.json>
//! - aeropipe explain --input <docs> --pipeline <pipeline.json>
//! - aeropipe decode-frames <frames.bin>

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// aeropipe - document aggregation pipeline engine
#[derive(Parser, Debug)]
#[command(name = "aeropipe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Inputs shared by `aggregate` and `explain`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Input documents: one extended JSON document per line, or a JSON array
    #[arg(long)]
    pub input: PathBuf,

    /// Pipeline file: a JSON array of stage records
    #[arg(long)]
    pub pipeline: PathBuf,

    /// Index definitions: a JSON array of {"key": {...}, "options": {...}}
    #[arg(long)]
    pub indexes: Option<PathBuf>,

    /// Engine configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Force the named index
    #[arg(long, conflicts_with = "collscan")]
    pub hint: Option<String>,

    /// Force a collection scan
    #[arg(long)]
    pub collscan: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a pipeline and print one document per line
    Aggregate {
        #[command(flatten)]
        run: RunArgs,

        /// Print canonical extended JSON (numeric subtypes kept)
        #[arg(long)]
        canonical: bool,

        /// Write checksummed binary frames to this file instead of stdout
        #[arg(long)]
        frames: Option<PathBuf>,
    },

    /// Print the access plan chosen for a pipeline
    Explain {
        #[command(flatten)]
        run: RunArgs,

        /// Print the plan as a JSON document
        #[arg(long)]
        json: bool,
    },

    /// Print the documents stored in a frame file
    DecodeFrames {
        /// Frame file written by `aggregate --frames`
        input: PathBuf,

        /// Print canonical extended JSON
        #[arg(long)]
        canonical: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
