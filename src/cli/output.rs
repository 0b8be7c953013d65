//! Output formatting for CLI commands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cli::args::{DivanArgs, OutputFormat};
use crate::document::Value;
use crate::error::Result;
use crate::tracker::IndexingStats;

/// One line of `divan list`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSummary {
    pub name: String,
    pub map_reduce: bool,
    pub entries: usize,
}

/// Result of `divan list`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexListing {
    pub indexes: Vec<IndexSummary>,
}

/// Result of `divan stats`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    pub directory: String,
    pub map_reduce: bool,
    pub stored_fields: Vec<String>,
    pub entries: usize,
    pub mapped_results: usize,
    pub pending_tasks: usize,
    /// Outcome counters of map and reduce passes.
    #[serde(flatten)]
    pub indexing: IndexingStats,
}

/// One hit of `divan query`.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryHitOutput {
    pub document_id: Option<String>,
    pub fields: BTreeMap<String, Value>,
}

/// Result of `divan query`.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryOutput {
    pub index: String,
    pub query: String,
    pub total_results: usize,
    pub hits: Vec<QueryHitOutput>,
    pub duration_ms: u64,
}

/// Result of `divan delete-index`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletionResult {
    pub index: String,
    pub existed: bool,
}

/// Result of `divan pending-tasks`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListing {
    pub tasks: Vec<TaskOutput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskOutput {
    pub index: String,
    pub reduce_key: String,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &DivanArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &DivanArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    print_human_value(&value, 0);
    Ok(())
}

fn print_human_value(value: &serde_json::Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(map) => {
            for (key, item) in map {
                match item {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) if !is_empty(item) => {
                        println!("{pad}{key}:");
                        print_human_value(item, indent + 1);
                    }
                    _ => println!("{pad}{key}: {}", format_value(item)),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                println!("{pad}[{}]", i + 1);
                print_human_value(item, indent + 1);
            }
        }
        other => println!("{pad}{}", format_value(other)),
    }
}

fn is_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &DivanArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::Array(items) if items.is_empty() => "(none)".to_string(),
        serde_json::Value::Object(map) if map.is_empty() => "(none)".to_string(),
        other => other.to_string(),
    }
}
