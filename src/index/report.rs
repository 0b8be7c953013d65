//! Outcome of a write-path pass over a batch of items.

use log::warn;

use crate::error::{DivanError, Result};

/// One item that failed and was left out of the pass.
#[derive(Debug)]
pub struct ItemFailure {
    /// Identity of the item: a document id, or an aggregation key with the
    /// position of the contribution or output.
    pub item: String,
    pub error: DivanError,
}

/// Successes and failures of a map, reduce, or remove pass.
#[derive(Debug, Default)]
pub struct IndexingReport {
    /// Items processed successfully, in input order.
    pub indexed: Vec<String>,
    pub failures: Vec<ItemFailure>,
    /// Reduce tasks newly added to the outbox by this pass.
    pub reduce_tasks: usize,
}

impl IndexingReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_success<S: Into<String>>(&mut self, item: S) {
        self.indexed.push(item.into());
    }

    /// Record a failed item and log it with its identity.
    pub fn record_failure<S: Into<String>>(&mut self, item: S, error: DivanError) {
        let item = item.into();
        warn!("Failed to process {item}: {error}");
        self.failures.push(ItemFailure { item, error });
    }

    /// Fold a per-item result into the report, returning the value on success.
    pub fn fold<T, S: Into<String>>(&mut self, item: S, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.record_failure(item, error);
                None
            }
        }
    }

    /// Add the outcome of another pass to this one.
    pub fn merge(&mut self, other: IndexingReport) {
        self.indexed.extend(other.indexed);
        self.failures.extend(other.failures);
        self.reduce_tasks += other.reduce_tasks;
    }

    /// Ids of the failed items.
    pub fn failed_items(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.item.as_str()).collect()
    }
}
