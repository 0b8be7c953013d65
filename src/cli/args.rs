//! Command line argument parsing for the Divan CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::DEFAULT_PAGE_SIZE;
use crate::storage::IndexStorageConfig;

/// Divan - administration of a document database's indexes
#[derive(Parser, Debug, Clone)]
#[command(name = "divan")]
#[command(about = "Inspect and maintain the indexes of a Divan data directory")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct DivanArgs {
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

    /// Storage configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Data directory; overrides the configuration file
    #[arg(short, long, env = "DIVAN_DATA_DIR", value_name = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl DivanArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }

    /// Storage configuration from `--config` and `--data-dir`.
    pub fn storage_config(&self) -> Result<IndexStorageConfig> {
        let config = match &self.config {
            Some(path) => IndexStorageConfig::from_file(path)?,
            None => IndexStorageConfig::default(),
        };
        Ok(match &self.data_dir {
            Some(data_dir) => config.with_data_dir(data_dir),
            None => config,
        })
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the indexes of the data directory
    List,

    /// Show statistics of one index
    Stats(StatsArgs),

    /// Query an index with the index query language
    Query(QueryArgs),

    /// Delete an index and its files
    #[command(name = "delete-index")]
    DeleteIndex(DeleteIndexArgs),

    /// Show reduce tasks waiting in the outbox
    #[command(name = "pending-tasks")]
    PendingTasks,
}

/// Arguments for index statistics
#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,
}

/// Arguments for querying
#[derive(Parser, Debug, Clone)]
pub struct QueryArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Query string, optionally prefixed with a `<Field1, Field2>: ` projection
    #[arg(value_name = "QUERY", default_value = "")]
    pub query: String,

    /// Offset of the first result
    #[arg(short, long, default_value = "0")]
    pub start: usize,

    /// Maximum number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Stored fields to return (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,
}

/// Arguments for deleting an index
#[derive(Parser, Debug, Clone)]
pub struct DeleteIndexArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
