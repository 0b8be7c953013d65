//! Non-aggregating index.
//!
//! Entries are keyed by document id. A detached index fails every document
//! without touching its stored entries.

use std::sync::Arc;

use log::debug;

use crate::document::{DOCUMENT_ID_FIELD, Document};
use crate::error::{DivanError, Result};
use crate::index::{
    EntryConverter, Index, IndexCore, IndexDefinition, IndexQuery, IndexingReport, QueryResult,
    WorkContext,
};
use crate::segment::{IndexEntry, SegmentStore};

/// An index whose entries are the map outputs of each document, tagged with
/// the document id.
#[derive(Debug)]
pub struct SimpleIndex {
    core: IndexCore,
    converter: EntryConverter,
}

impl SimpleIndex {
    pub fn new(
        name: &str,
        definition: IndexDefinition,
        store: Arc<dyn SegmentStore>,
        context: WorkContext,
    ) -> Self {
        let converter = EntryConverter::new(definition.stored_fields().clone());
        SimpleIndex {
            core: IndexCore::new(name, definition, store, context),
            converter,
        }
    }

    /// Map one document into entries. Any failing output fails the whole
    /// document.
    fn map_document(&self, document: &Document) -> Result<Vec<IndexEntry>> {
        self.core
            .definition
            .map_function()
            .map(document)?
            .iter()
            .map(|output| {
                let mut entry = self.converter.convert(output)?;
                entry.add_field(DOCUMENT_ID_FIELD, document.id.as_str(), true);
                Ok(entry)
            })
            .collect()
    }
}

impl Index for SimpleIndex {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn definition(&self) -> &IndexDefinition {
        &self.core.definition
    }

    fn index_documents(&self, documents: &[Document]) -> Result<IndexingReport> {
        let Some(_writer) = self.core.write() else {
            return Ok(IndexingReport::new());
        };
        let name = self.core.name.as_str();
        let mut report = IndexingReport::new();

        if self.core.definition.is_detached() {
            for document in documents {
                report.record_failure(
                    document.id.as_str(),
                    DivanError::unavailable(format!("index {name} is detached")),
                );
            }
            return Ok(report);
        }

        let triggers = &self.core.context.triggers;
        for document in documents {
            let mapped = self.map_document(document);
            let succeeded = mapped.is_ok();
            // A failing document still loses its previous entries.
            let entries = report.fold(document.id.as_str(), mapped).unwrap_or_default();
            let created = if triggers.is_empty() {
                Vec::new()
            } else {
                entries.clone()
            };
            let written = self
                .core
                .store
                .replace_by_field(DOCUMENT_ID_FIELD, &document.id, entries);
            if let Some(deleted) = report.fold(document.id.as_str(), written) {
                triggers.entries_replaced(name, &document.id, deleted, &created);
                if succeeded {
                    report.record_success(document.id.as_str());
                }
            }
        }

        let (successes, failures) = (report.indexed.len(), report.failures.len());
        self.core
            .record_stats(|stats| stats.record_indexing(successes, failures))?;
        debug!(
            "Indexed {successes} of {} documents into {name}",
            documents.len()
        );
        Ok(report)
    }

    fn remove(&self, document_ids: &[String]) -> Result<IndexingReport> {
        let Some(_writer) = self.core.write() else {
            return Ok(IndexingReport::new());
        };
        let mut report = IndexingReport::new();

        for id in document_ids {
            let deleted = self.core.store.delete_by_field(DOCUMENT_ID_FIELD, id);
            if let Some(count) = report.fold(id.as_str(), deleted) {
                debug!("Removed {count} entries of {id} from {}", self.core.name);
                self.core
                    .context
                    .triggers
                    .entries_replaced(&self.core.name, id, count, &[]);
                report.record_success(id.as_str());
            }
        }
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
