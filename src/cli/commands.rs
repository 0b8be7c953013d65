//! Command implementations for the Divan CLI.
//!
//! The CLI works on a data directory without the application's index
//! definitions, so indexes are opened detached: they can be listed, queried
//! and deleted, but not fed documents.

use std::time::Instant;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::error::Result;
use crate::index::IndexQuery;
use crate::storage::IndexStorage;

/// Execute a CLI command.
pub fn execute_command(args: DivanArgs) -> Result<()> {
    let storage = IndexStorage::open(args.storage_config()?)?;
    let result = match &args.command {
        Command::List => list_indexes(&storage, &args),
        Command::Stats(stats_args) => show_stats(&storage, stats_args, &args),
        Command::Query(query_args) => query_index(&storage, query_args, &args),
        Command::DeleteIndex(delete_args) => delete_index(&storage, delete_args, &args),
        Command::PendingTasks => pending_tasks(&storage, &args),
    };
    storage.close()?;
    result
}

fn list_indexes(storage: &IndexStorage, cli_args: &DivanArgs) -> Result<()> {
    let indexes = storage
        .list_index_names()
        .into_iter()
        .filter_map(|name| {
            let index = storage.get_index(&name)?;
            Some(IndexSummary {
                map_reduce: index.definition().is_map_reduce(),
                entries: index.entry_count(),
                name,
            })
        })
        .collect();

    output_result(
        &format!("Indexes in {}", storage.config().data_dir.display()),
        &IndexListing { indexes },
        cli_args,
    )
}

fn show_stats(storage: &IndexStorage, args: &StatsArgs, cli_args: &DivanArgs) -> Result<()> {
    let Some(index) = storage.get_index(&args.index) else {
        return Err(crate::error::DivanError::not_found(format!("index {}", args.index)));
    };

    let stats = IndexStats {
        name: args.index.clone(),
        directory: storage.index_directory(&args.index).display().to_string(),
        map_reduce: index.definition().is_map_reduce(),
        stored_fields: index.definition().stored_fields().iter().cloned().collect(),
        entries: index.entry_count(),
        mapped_results: storage.tracker().record_count(&args.index),
        pending_tasks: storage
            .pending_tasks()
            .iter()
            .filter(|task| task.index == args.index)
            .count(),
        indexing: storage.indexing_stats(&args.index),
    };
    output_result(&format!("Statistics for {}", args.index), &stats, cli_args)
}

fn query_index(storage: &IndexStorage, args: &QueryArgs, cli_args: &DivanArgs) -> Result<()> {
    let mut query = IndexQuery::parse(&args.query)?
        .with_start(args.start)
        .with_page_size(args.page_size);
    if !args.fields.is_empty() {
        query = query.with_fields(args.fields.iter().cloned());
    }

    let start_time = Instant::now();
    let result = storage.query(&args.index, &query)?;
    let duration = start_time.elapsed();

    let output = QueryOutput {
        index: args.index.clone(),
        query: query.query.clone(),
        total_results: result.total_results,
        hits: result
            .hits
            .into_iter()
            .map(|hit| QueryHitOutput {
                document_id: hit.document_id,
                fields: hit.fields,
            })
            .collect(),
        duration_ms: duration.as_millis() as u64,
    };
    output_result(
        &format!("{} results for '{}'", output.total_results, output.query),
        &output,
        cli_args,
    )
}

fn delete_index(storage: &IndexStorage, args: &DeleteIndexArgs, cli_args: &DivanArgs) -> Result<()> {
    let existed = storage.list_index_names().contains(&args.index);
    storage.delete_index(&args.index)?;
    output_result(
        &format!("Deleted index {}", args.index),
        &DeletionResult {
            index: args.index.clone(),
            existed,
        },
        cli_args,
    )
}

fn pending_tasks(storage: &IndexStorage, cli_args: &DivanArgs) -> Result<()> {
    let tasks = storage
        .pending_tasks()
        .into_iter()
        .map(|task| TaskOutput {
            index: task.index,
            reduce_key: task.reduce_key,
        })
        .collect::<Vec<_>>();
    output_result(
        &format!("{} pending reduce tasks", tasks.len()),
        &TaskListing { tasks },
        cli_args,
    )
}
