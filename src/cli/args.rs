//! Command line argument parsing for the Spindle CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Spindle - shared segment readers and exact phrase search
#[derive(Parser, Debug, Clone)]
#[command(name = "spindle")]
#[command(about = "Build, inspect and phrase-search segment indexes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct SpindleArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Reader configuration file (JSON)
    #[arg(long, value_name = "CONFIG_FILE", env = "SPINDLE_READER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl SpindleArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Index a text file as a new segment, one document per line
    Index(IndexArgs),

    /// List the terms of an index with their doc freqs
    Terms(TermsArgs),

    /// Run an exact phrase query
    Phrase(PhraseArgs),

    /// Merge all segments into one, dropping deleted documents
    Optimize(OptimizeArgs),

    /// Show the segments of an index
    Info(InfoArgs),
}

/// Arguments for indexing a file
#[derive(Parser, Debug, Clone)]
pub struct IndexArgs {
    /// Path to the index directory (created if missing)
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Text file to index, one document per line
    #[arg(value_name = "INPUT_FILE")]
    pub input: PathBuf,

    /// Field the lines are indexed into
    #[arg(long, default_value = "body")]
    pub field: String,

    /// Pack the segment into a compound file
    #[arg(long)]
    pub compound: bool,

    /// Store term vectors for the text field
    #[arg(long)]
    pub vectors: bool,
}

/// Arguments for listing terms
#[derive(Parser, Debug, Clone)]
pub struct TermsArgs {
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Only list terms of this field
    #[arg(long)]
    pub field: Option<String>,

    /// Start at the first term >= this text (requires --field)
    #[arg(long, requires = "field")]
    pub from: Option<String>,

    /// Maximum number of terms to list
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for a phrase query
#[derive(Parser, Debug, Clone)]
pub struct PhraseArgs {
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Field to search
    #[arg(long, default_value = "body")]
    pub field: String,

    /// Phrase terms, in order
    #[arg(value_name = "TERM", required = true, num_args = 1..)]
    pub phrase: Vec<String>,

    /// Maximum number of hits to return
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Print the stored fields of every hit
    #[arg(long)]
    pub show_documents: bool,
}

/// Arguments for optimizing an index
#[derive(Parser, Debug, Clone)]
pub struct OptimizeArgs {
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Pack the merged segment into a compound file
    #[arg(long)]
    pub compound: bool,
}

/// Arguments for showing index information
#[derive(Parser, Debug, Clone)]
pub struct InfoArgs {
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
