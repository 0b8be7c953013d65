//! Aggregating (map/reduce) index.
//!
//! A map pass never touches the segment store. For every incoming document it
//! evicts the document's previous contributions from the tracker, records the
//! fresh ones, and enqueues one reduce task per aggregation key that gained or
//! lost a contribution. A reduce pass later rebuilds the entries of a single
//! key from the contributions the tracker holds at that moment.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;

use crate::document::{DOCUMENT_ID_FIELD, Document, Value};
use crate::error::{DivanError, Result};
use crate::index::{
    EntryConverter, Index, IndexCore, IndexDefinition, IndexQuery, IndexingReport, QueryResult,
    REDUCE_KEY_FIELD, ReduceDefinition, WorkContext,
};
use crate::segment::SegmentStore;
use crate::tracker::compute_hash;

/// One mapped contribution: aggregation key and tagged JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Contribution {
    reduce_key: String,
    data: String,
}

/// An index whose entries are reduce outputs, one group per aggregation key.
#[derive(Debug)]
pub struct MapReduceIndex {
    core: IndexCore,
    reduce: ReduceDefinition,
    converter: EntryConverter,
}

impl MapReduceIndex {
    /// Fails when the definition has no reduce step.
    pub fn new(
        name: &str,
        definition: IndexDefinition,
        store: Arc<dyn SegmentStore>,
        context: WorkContext,
    ) -> Result<Self> {
        let reduce = definition.reduce_definition().cloned().ok_or_else(|| {
            DivanError::invalid_argument(format!("index {name} has no reduce definition"))
        })?;

        Ok(MapReduceIndex {
            core: IndexCore::new(name, definition, store, context),
            reduce,
            converter: EntryConverter::storing_all(),
        })
    }

    /// Map one document into its contributions. Outputs whose group key is
    /// missing or null are skipped.
    fn map_document(&self, document: &Document) -> Result<Vec<Contribution>> {
        let outputs = self.core.definition.map_function().map(document)?;

        let mut contributions = Vec::with_capacity(outputs.len());
        for output in outputs {
            match self.reduce.group_by.group_key(&output) {
                Some(key) if !key.is_null() => contributions.push(Contribution {
                    reduce_key: key.to_key_string(),
                    data: output.to_tagged_json()?,
                }),
                _ => debug!(
                    "Skipping contribution of {} to {} without a group key",
                    document.id, self.core.name
                ),
            }
        }
        Ok(contributions)
    }

    fn detached_error(&self) -> DivanError {
        DivanError::unavailable(format!(
            "index {} is detached, its functions are not loaded",
            self.core.name
        ))
    }
}

impl Index for MapReduceIndex {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn definition(&self) -> &IndexDefinition {
        &self.core.definition
    }

    /// Record the batch's contributions and queue the affected keys. The
    /// eviction of stale contributions, the fresh records and the queued
    /// tasks are committed as one tracker snapshot.
    fn index_documents(&self, documents: &[Document]) -> Result<IndexingReport> {
        let Some(_writer) = self.core.write() else {
            return Ok(IndexingReport::new());
        };
        let name = self.core.name.as_str();
        let mut report = IndexingReport::new();

        if self.core.definition.is_detached() {
            for document in documents {
                report.record_failure(document.id.as_str(), self.detached_error());
            }
            return Ok(report);
        }

        // Later occurrences of a document id win.
        let mut mapped: Vec<(&str, Vec<Contribution>)> = Vec::with_capacity(documents.len());
        for document in documents {
            let id = document.id.as_str();
            if let Some(contributions) = report.fold(id, self.map_document(document)) {
                mapped.retain(|(seen, _)| *seen != id);
                mapped.push((id, contributions));
            }
        }
        for (document_id, _) in &mapped {
            report.record_success(*document_id);
        }

        let (successes, failures) = (report.indexed.len(), report.failures.len());
        let (affected_keys, added) = self.core.context.tracker.batch(|batch| {
            let mut affected = BTreeSet::new();
            for document in documents {
                affected.extend(batch.evict_document(name, &document.id));
            }
            for (document_id, contributions) in &mapped {
                for contribution in contributions {
                    batch.record_contribution(
                        name,
                        document_id,
                        &contribution.reduce_key,
                        &contribution.data,
                        &compute_hash(name, &contribution.reduce_key),
                    );
                    affected.insert(contribution.reduce_key.clone());
                }
            }
            let added = affected.iter().filter(|key| batch.enqueue(name, key)).count();
            batch.record_stats(name, |stats| stats.record_indexing(successes, failures));
            (affected.len(), added)
        })?;

        report.reduce_tasks = added;
        debug!("Mapped {successes} documents into {name}, {affected_keys} aggregation keys affected");
        Ok(report)
    }

    fn remove(&self, document_ids: &[String]) -> Result<IndexingReport> {
        let Some(_writer) = self.core.write() else {
            return Ok(IndexingReport::new());
        };
        let name = self.core.name.as_str();
        let mut report = IndexingReport::new();

        report.reduce_tasks = self.core.context.tracker.batch(|batch| {
            let affected: BTreeSet<String> = document_ids
                .iter()
                .flat_map(|id| batch.evict_document(name, id))
                .collect();
            affected.iter().filter(|key| batch.enqueue(name, key)).count()
        })?;

        // Best-effort cleanup of entries written under the raw document id.
        for id in document_ids {
            let deleted = self.core.store.delete_by_field(DOCUMENT_ID_FIELD, id);
            if report.fold(id.as_str(), deleted).is_some() {
                report.record_success(id.as_str());
            }
        }
        Ok(report)
    }

    /// Rebuild the entries of one aggregation key from its current
    /// contributions. Undecodable contributions and unconvertible outputs are
    /// reported and left out; a failing reduce leaves the key without entries.
    /// A detached or closed index refuses the pass and keeps the key's
    /// entries, so the task can run against the index that replaces it.
    fn reduce(&self, reduce_key: &str) -> Result<IndexingReport> {
        let Some(_writer) = self.core.write() else {
            return Err(DivanError::unavailable(format!(
                "index {} is closed",
                self.core.name
            )));
        };
        if self.core.definition.is_detached() {
            return Err(self.detached_error());
        }
        let name = self.core.name.as_str();
        let mut report = IndexingReport::new();

        let records = self.core.context.tracker.contributions_for_key(name, reduce_key);
        let contributions: Vec<Value> = records
            .iter()
            .filter_map(|record| {
                report.fold(
                    format!("{reduce_key} (contribution of {})", record.document_id),
                    Value::from_tagged_json(&record.data),
                )
            })
            .collect();

        let mut entries = Vec::new();
        if !contributions.is_empty() {
            let outputs = self.reduce.reduce.reduce(reduce_key, &contributions);
            if let Some(outputs) = report.fold(reduce_key, outputs) {
                for (position, output) in outputs.iter().enumerate() {
                    let converted = self.converter.convert(output);
                    if let Some(mut entry) =
                        report.fold(format!("{reduce_key} (output {position})"), converted)
                    {
                        entry.add_field(REDUCE_KEY_FIELD, reduce_key, false);
                        entries.push(entry);
                    }
                }
                report.record_success(reduce_key);
            }
        }

        let triggers = &self.core.context.triggers;
        let created = if triggers.is_empty() {
            Vec::new()
        } else {
            entries.clone()
        };
        let written = entries.len();
        let deleted = self
            .core
            .store
            .replace_by_field(REDUCE_KEY_FIELD, reduce_key, entries)?;
        triggers.entries_replaced(name, reduce_key, deleted, &created);

        let (successes, failures) = (report.indexed.len(), report.failures.len());
        self.core
            .record_stats(|stats| stats.record_reduce(successes, failures))?;
        debug!(
            "Reduced {reduce_key} in {name}: {} contributions, {deleted} entries replaced by {written}",
            contributions.len()
        );
        Ok(report)
    }

    fn query(&self, query: &IndexQuery) -> Result<QueryResult> {
        self.core.query(query)
    }

    fn entry_count(&self) -> usize {
        self.core.store.len()
    }

    fn close(&self) -> Result<()> {
        self.core.close()
    }
}
