//! Index module for Divan.
//!
//! An index owns one segment store and fills it from documents:
//!
//! - [`SimpleIndex`] writes the map function's outputs directly, one group of
//!   entries per document id.
//! - [`MapReduceIndex`] records each document's contributions in the
//!   mapped-result tracker and leaves aggregation to deferred reduce tasks,
//!   one per affected aggregation key.
//!
//! Both serialize their writes with a per-index writer lock; queries run
//! against the store concurrently. Once an index is closed its writer lock
//! refuses further writes, so a handle kept past `delete_index` is inert.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::document::{DOCUMENT_ID_FIELD, Document, Value};
use crate::error::Result;
use crate::query::{Query, QueryCompiler, split_projection};
use crate::segment::{IndexEntry, SegmentStore};
use crate::tracker::{IndexingStats, MappedResultTracker};

pub mod converter;
pub mod definition;
pub mod map_reduce;
pub mod report;
pub mod simple;
pub mod trigger;

// Re-export commonly used types
pub use converter::EntryConverter;
pub use definition::{
    GroupByFunction, IndexDefinition, IndexShape, MapFunction, ReduceDefinition, ReduceFunction,
};
pub use map_reduce::MapReduceIndex;
pub use report::{IndexingReport, ItemFailure};
pub use simple::SimpleIndex;
pub use trigger::{IndexUpdateTrigger, Triggers};

/// Field tagging every entry written by a reduce pass with its aggregation key.
pub const REDUCE_KEY_FIELD: &str = "__reduce_key";

/// Page size used when a query does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 128;

/// A query against one index: a query string plus paging and projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub query: String,
    pub start: usize,
    pub page_size: usize,
    /// Stored fields to return; `None` returns every stored field.
    pub fields_to_fetch: Option<Vec<String>>,
}

impl IndexQuery {
    pub fn new<S: Into<String>>(query: S) -> Self {
        IndexQuery {
            query: query.into(),
            start: 0,
            page_size: DEFAULT_PAGE_SIZE,
            fields_to_fetch: None,
        }
    }

    /// Parse compiled query text, honouring a leading `<f1, f2>: ` projection.
    pub fn parse(text: &str) -> Result<Self> {
        let (projection, rest) = split_projection(text)?;
        Ok(IndexQuery {
            fields_to_fetch: projection,
            ..IndexQuery::new(rest)
        })
    }

    /// Compile a typed query. The projection is kept even when there is no
    /// predicate.
    pub fn from_query(query: &Query) -> Result<Self> {
        let text = match query.predicate() {
            Some(predicate) => QueryCompiler::compile_predicate(predicate)?,
            None => String::new(),
        };
        Ok(IndexQuery {
            fields_to_fetch: query.projection().map(<[String]>::to_vec),
            ..IndexQuery::new(text)
        })
    }

    pub fn with_start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields_to_fetch = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// One matching entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    /// Source document, for entries written by a simple index.
    pub document_id: Option<String>,
    /// Stored fields; repeated fields become a list.
    pub fields: BTreeMap<String, Value>,
}

impl QueryHit {
    fn from_entry(entry: &IndexEntry, fields_to_fetch: Option<&[String]>) -> Self {
        let mut fields: BTreeMap<String, Value> = BTreeMap::new();
        for field in entry.stored_fields() {
            if field.name == DOCUMENT_ID_FIELD {
                continue;
            }
            if let Some(wanted) = fields_to_fetch
                && !wanted.contains(&field.name)
            {
                continue;
            }
            let value = Value::from(field.value.as_str());
            match fields.get_mut(&field.name) {
                Some(Value::List(items)) => items.push(value),
                Some(existing) => {
                    let first = std::mem::take(existing);
                    *existing = Value::List(vec![first, value]);
                }
                None => {
                    fields.insert(field.name.clone(), value);
                }
            }
        }

        QueryHit {
            document_id: entry.first(DOCUMENT_ID_FIELD).map(str::to_string),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// A page of hits plus the total number of matches.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub hits: Vec<QueryHit>,
    pub total_results: usize,
}

/// A named index.
pub trait Index: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn definition(&self) -> &IndexDefinition;

    /// Map a batch of documents. Failing documents are reported, not fatal.
    fn index_documents(&self, documents: &[Document]) -> Result<IndexingReport>;

    /// Remove documents by id.
    fn remove(&self, document_ids: &[String]) -> Result<IndexingReport>;

    /// Re-aggregate one key. Indexes without a reduce step ignore it.
    fn reduce(&self, reduce_key: &str) -> Result<IndexingReport> {
        debug!(
            "Index {} has no reduce step, ignoring key {reduce_key}",
            self.name()
        );
        Ok(IndexingReport::new())
    }

    fn query(&self, query: &IndexQuery) -> Result<QueryResult>;

    /// Number of entries in the index.
    fn entry_count(&self) -> usize;

    /// Release the segment store.
    fn close(&self) -> Result<()>;
}

/// Collaborators shared by every index of a storage.
#[derive(Debug, Clone)]
pub struct WorkContext {
    /// Contributions, reduce task outbox and indexing counters.
    pub tracker: Arc<MappedResultTracker>,
    pub triggers: Triggers,
}

impl WorkContext {
    pub fn in_memory() -> Self {
        WorkContext::new(Arc::new(MappedResultTracker::in_memory()))
    }

    pub fn new(tracker: Arc<MappedResultTracker>) -> Self {
        WorkContext {
            tracker,
            triggers: Triggers::new(),
        }
    }
}

/// Build the index kind matching the definition's shape.
pub fn build_index(
    name: &str,
    definition: IndexDefinition,
    store: Arc<dyn SegmentStore>,
    context: &WorkContext,
) -> Result<Arc<dyn Index>> {
    if definition.is_map_reduce() {
        Ok(Arc::new(MapReduceIndex::new(
            name,
            definition,
            store,
            context.clone(),
        )?))
    } else {
        Ok(Arc::new(SimpleIndex::new(
            name,
            definition,
            store,
            context.clone(),
        )))
    }
}

/// State common to both index kinds.
#[derive(Debug)]
pub(crate) struct IndexCore {
    pub name: String,
    pub definition: IndexDefinition,
    pub store: Arc<dyn SegmentStore>,
    pub context: WorkContext,
    writer: Mutex<()>,
    closed: AtomicBool,
}

impl IndexCore {
    pub fn new(
        name: &str,
        definition: IndexDefinition,
        store: Arc<dyn SegmentStore>,
        context: WorkContext,
    ) -> Self {
        IndexCore {
            name: name.to_string(),
            definition,
            store,
            context,
            writer: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Exclusive write access to the index, or `None` once it is closed.
    pub fn write(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.writer.lock();
        if self.closed.load(Ordering::Acquire) {
            debug!("Index {} is closed, ignoring write", self.name);
            return None;
        }
        Some(guard)
    }

    /// Refuse further writes and release the store. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let _writer = self.writer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.store.close()
    }

    pub fn record_stats<F: FnOnce(&mut IndexingStats)>(&self, f: F) -> Result<()> {
        self.context
            .tracker
            .batch(|batch| batch.record_stats(&self.name, f))
    }

    pub fn query(&self, query: &IndexQuery) -> Result<QueryResult> {
        let results = self
            .store
            .search(&query.query, query.start, query.page_size)?;
        debug!(
            "Query '{}' on {} matched {} entries",
            query.query, self.name, results.total
        );

        let fields_to_fetch = query.fields_to_fetch.as_deref();
        Ok(QueryResult {
            hits: results
                .entries
                .iter()
                .map(|entry| QueryHit::from_entry(entry, fields_to_fetch))
                .collect(),
            total_results: results.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::field;

    #[test]
    fn test_parse_with_projection() {
        let query = IndexQuery::parse("<Name, Age>: Birthday:{20100515000000000 TO NULL} ").unwrap();
        assert_eq!(query.query, "Birthday:{20100515000000000 TO NULL} ");
        assert_eq!(
            query.fields_to_fetch,
            Some(vec!["Name".to_string(), "Age".to_string()])
        );
        assert_eq!(query.page_size, DEFAULT_PAGE_SIZE);

        let plain = IndexQuery::parse("Name:ayende ").unwrap();
        assert_eq!(plain.fields_to_fetch, None);
    }

    #[test]
    fn test_from_query_keeps_projection_without_predicate() {
        let query = IndexQuery::from_query(&Query::new().select(["Name"])).unwrap();
        assert_eq!(query.query, "");
        assert_eq!(query.fields_to_fetch, Some(vec!["Name".to_string()]));

        let query =
            IndexQuery::from_query(&Query::new().filter(field("Age").gt(3))).unwrap();
        assert_eq!(query.query, "Age_Range:[0x00000003 TO NULL] ");
    }

    #[test]
    fn test_hit_from_entry() {
        let entry = IndexEntry::new()
            .with_field(DOCUMENT_ID_FIELD, "users/1", true)
            .with_field("Name", "ayende", true)
            .with_field("Tags", "a", true)
            .with_field("Tags", "b", true)
            .with_field("Age_Range", "0x00000003", false);

        let hit = QueryHit::from_entry(&entry, None);
        assert_eq!(hit.document_id.as_deref(), Some("users/1"));
        assert_eq!(hit.get("Name"), Some(&Value::from("ayende")));
        assert_eq!(
            hit.get("Tags"),
            Some(&Value::List(vec![Value::from("a"), Value::from("b")]))
        );
        assert!(hit.get("Age_Range").is_none());

        let projected = ["Tags".to_string()];
        let hit = QueryHit::from_entry(&entry, Some(&projected));
        assert_eq!(hit.fields.len(), 1);
    }
}
