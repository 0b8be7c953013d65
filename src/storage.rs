//! Index storage: the registry of named indexes.
//!
//! [`IndexStorage`] is constructed once at process start and shared by
//! reference (usually behind an `Arc`) with every caller: request handlers,
//! background schedulers, admin tools. It owns:
//!
//! - one directory per index under `<data_dir>/<index_dir_name>/`, holding the
//!   index's `segments.json` and `index.json`;
//! - the mapped-result tracker under `<data_dir>/<mapped_results_dir_name>/`,
//!   one snapshot per index holding its contributions, its reduce task outbox
//!   and its indexing counters;
//! - the update triggers notified of every entry an index writes.
//!
//! Structural changes (create, delete, open) are serialized by one mutex and
//! publish a new name→index map, so readers never see a half-updated registry.
//!
//! # Example
//!
//! ```
//! use divan::document::{Document, Value};
//! use divan::index::{IndexDefinition, IndexQuery};
//! use divan::storage::{IndexStorage, IndexStorageConfig};
//!
//! # fn main() -> divan::error::Result<()> {
//! # let dir = tempfile::TempDir::new()?;
//! let storage = IndexStorage::open(IndexStorageConfig::new(dir.path()))?;
//! storage.create_index(
//!     "Users/ByName",
//!     IndexDefinition::map(|doc: &Document| {
//!         Ok(vec![Value::object([("Name", doc.get_field("Name").cloned().unwrap_or_default())])])
//!     })
//!     .store_field("Name"),
//! )?;
//!
//! storage.index("Users/ByName", &[Document::builder("users/1").field("Name", "ayende").build()])?;
//! let result = storage.query("Users/ByName", &IndexQuery::new("Name:ayende "))?;
//! assert_eq!(result.total_results, 1);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{DivanError, Result};
use crate::index::{
    Index, IndexDefinition, IndexQuery, IndexShape, IndexUpdateTrigger, IndexingReport,
    QueryResult, WorkContext, build_index,
};
use crate::segment::FileSegmentStore;
use crate::task::ReduceTask;
use crate::tracker::{IndexingStats, MappedResultTracker};
use crate::util::json_file;

/// Name of the metadata file inside an index directory.
pub const INDEX_METADATA_FILE: &str = "index.json";

/// Configuration for [`IndexStorage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexStorageConfig {
    /// Root of all persisted state.
    pub data_dir: PathBuf,
    /// Directory under `data_dir` holding one sub-directory per index.
    pub index_dir_name: String,
    /// Directory under `data_dir` holding the mapped-result tracker's
    /// per-index snapshots.
    pub mapped_results_dir_name: String,
}

impl Default for IndexStorageConfig {
    fn default() -> Self {
        IndexStorageConfig {
            data_dir: PathBuf::from("Data"),
            index_dir_name: "Index".to_string(),
            mapped_results_dir_name: "MappedResults".to_string(),
        }
    }
}

impl IndexStorageConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        IndexStorageConfig {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file. Missing keys take their
    /// defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        json_file::read(path)?.ok_or_else(|| {
            DivanError::not_found(format!("configuration file {}", path.display()))
        })
    }

    pub fn with_data_dir<P: AsRef<Path>>(mut self, data_dir: P) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_index_dir_name<S: Into<String>>(mut self, name: S) -> Self {
        self.index_dir_name = name.into();
        self
    }

    pub fn with_mapped_results_dir_name<S: Into<String>>(mut self, name: S) -> Self {
        self.mapped_results_dir_name = name.into();
        self
    }

    pub fn index_root(&self) -> PathBuf {
        self.data_dir.join(&self.index_dir_name)
    }

    pub fn mapped_results_dir(&self) -> PathBuf {
        self.data_dir.join(&self.mapped_results_dir_name)
    }
}

/// Contents of `index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexMetadata {
    name: String,
    #[serde(flatten)]
    shape: IndexShape,
}

type Registry = HashMap<String, Arc<dyn Index>>;

/// Registry of named indexes.
#[derive(Debug)]
pub struct IndexStorage {
    config: IndexStorageConfig,
    indexes: RwLock<Arc<Registry>>,
    /// Serializes create, delete and open across the registry.
    structure: Mutex<()>,
    context: WorkContext,
}

impl IndexStorage {
    /// Open the registry, reloading every index saved under the data
    /// directory.
    ///
    /// Saved indexes come back with a detached definition: they answer
    /// queries, every document they are asked to map fails, and reduce
    /// passes are refused (their tasks stay pending) until
    /// [`IndexStorage::open_index`] binds their functions again. Tracker
    /// state of indexes with no directory is dropped.
    pub fn open(config: IndexStorageConfig) -> Result<Self> {
        let index_root = config.index_root();
        std::fs::create_dir_all(&index_root)?;

        let context = WorkContext::new(Arc::new(MappedResultTracker::open(
            config.mapped_results_dir(),
        )?));

        let mut indexes = Registry::new();
        for dir_entry in std::fs::read_dir(&index_root)? {
            let path = dir_entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(metadata) = json_file::read::<IndexMetadata>(&path.join(INDEX_METADATA_FILE))?
            else {
                warn!("Skipping {}: no {INDEX_METADATA_FILE}", path.display());
                continue;
            };

            let store = Arc::new(FileSegmentStore::open(&path)?);
            let definition = IndexDefinition::detached(metadata.shape);
            let index = build_index(&metadata.name, definition, store, &context)?;
            debug!("Loaded index {} from {}", metadata.name, path.display());
            indexes.insert(metadata.name, index);
        }

        // Leftovers of an index whose directory was removed before its
        // bookkeeping was.
        for name in context.tracker.index_names() {
            if !indexes.contains_key(&name) {
                warn!("Dropping mapped results of missing index {name}");
                context.tracker.evict_index(&name)?;
            }
        }

        info!(
            "Opened index storage at {} with {} indexes",
            config.data_dir.display(),
            indexes.len()
        );
        Ok(IndexStorage {
            config,
            indexes: RwLock::new(Arc::new(indexes)),
            structure: Mutex::new(()),
            context,
        })
    }

    pub fn config(&self) -> &IndexStorageConfig {
        &self.config
    }

    /// Directory of an index. Names are percent-encoded so that any name
    /// maps to exactly one directory.
    pub fn index_directory(&self, name: &str) -> PathBuf {
        self.config.index_root().join(json_file::encode_name(name))
    }

    /// Create and register an index.
    pub fn create_index(&self, name: &str, definition: IndexDefinition) -> Result<()> {
        if name.trim().is_empty() {
            return Err(DivanError::invalid_argument("index name must not be empty"));
        }

        let _structure = self.structure.lock();
        let directory = self.index_directory(name);
        if directory.exists() {
            return Err(DivanError::already_exists(format!("index {name}")));
        }

        let index = self.build(name, &directory, definition)?;
        self.update(|indexes| {
            indexes.insert(name.to_string(), index);
        });
        info!("Created index {name}");
        Ok(())
    }

    /// Bind a definition to an index saved on disk, replacing the instance
    /// currently registered under that name.
    pub fn open_index(&self, name: &str, definition: IndexDefinition) -> Result<()> {
        let _structure = self.structure.lock();
        let directory = self.index_directory(name);
        let Some(saved) =
            json_file::read::<IndexMetadata>(&directory.join(INDEX_METADATA_FILE))?
        else {
            return Err(DivanError::not_found(format!("index {name}")));
        };
        if saved.shape.map_reduce != definition.is_map_reduce() {
            return Err(DivanError::invalid_argument(format!(
                "index {name} was created {} a reduce step",
                if saved.shape.map_reduce { "with" } else { "without" }
            )));
        }

        if let Some(current) = self.get_index(name) {
            current.close()?;
        }
        let index = self.build(name, &directory, definition)?;
        self.update(|indexes| {
            indexes.insert(name.to_string(), index);
        });
        info!("Opened index {name}");
        Ok(())
    }

    /// Delete an index and its files. Deleting an unknown index does nothing.
    /// Handles to the index obtained earlier ignore later writes.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        let _structure = self.structure.lock();
        let Some(index) = self.get_index(name) else {
            debug!("Delete of unknown index {name} ignored");
            return Ok(());
        };

        index.close()?;
        self.update(|indexes| {
            indexes.remove(name);
        });

        let directory = self.index_directory(name);
        if directory.exists() {
            std::fs::remove_dir_all(&directory)?;
        }
        let documents = self.context.tracker.evict_index(name)?;
        info!("Deleted index {name} ({documents} tracked documents dropped)");
        Ok(())
    }

    pub fn list_index_names(&self) -> BTreeSet<String> {
        self.snapshot().keys().cloned().collect()
    }

    pub fn get_index(&self, name: &str) -> Option<Arc<dyn Index>> {
        self.snapshot().get(name).cloned()
    }

    /// Query an index. Unknown names fail with `NotFound`.
    pub fn query(&self, name: &str, query: &IndexQuery) -> Result<QueryResult> {
        match self.get_index(name) {
            Some(index) => index.query(query),
            None => Err(DivanError::not_found(format!("index {name}"))),
        }
    }

    /// Map documents into an index. Unknown names are ignored.
    pub fn index(&self, name: &str, documents: &[Document]) -> Result<IndexingReport> {
        match self.get_index(name) {
            Some(index) => index.index_documents(documents),
            None => {
                debug!("Index {name} not found, skipping {} documents", documents.len());
                Ok(IndexingReport::new())
            }
        }
    }

    /// Remove documents from an index. Unknown names are ignored.
    pub fn remove(&self, name: &str, document_ids: &[String]) -> Result<IndexingReport> {
        match self.get_index(name) {
            Some(index) => index.remove(document_ids),
            None => {
                debug!("Index {name} not found, skipping removal of {} documents", document_ids.len());
                Ok(IndexingReport::new())
            }
        }
    }

    /// Re-aggregate one key of an index. Unknown names are ignored.
    pub fn reduce(&self, name: &str, reduce_key: &str) -> Result<IndexingReport> {
        match self.get_index(name) {
            Some(index) => index.reduce(reduce_key),
            None => {
                debug!("Index {name} not found, skipping reduce of {reduce_key}");
                Ok(IndexingReport::new())
            }
        }
    }

    /// Reduce tasks not yet completed, grouped by index.
    pub fn pending_tasks(&self) -> Vec<ReduceTask> {
        self.context.tracker.pending_tasks()
    }

    /// Counters of an index's map and reduce passes. Unknown names report
    /// zeroes.
    pub fn indexing_stats(&self, name: &str) -> IndexingStats {
        self.context.tracker.stats(name)
    }

    /// Notify `trigger` of every entry written by any index, current or
    /// future.
    pub fn register_trigger(&self, trigger: Arc<dyn IndexUpdateTrigger>) {
        self.context.triggers.register(trigger);
    }

    pub fn tracker(&self) -> &Arc<MappedResultTracker> {
        &self.context.tracker
    }

    /// Close every index.
    pub fn close(&self) -> Result<()> {
        let _structure = self.structure.lock();
        for index in self.snapshot().values() {
            index.close()?;
        }
        Ok(())
    }

    fn snapshot(&self) -> Arc<Registry> {
        self.indexes.read().clone()
    }

    /// Publish a modified copy of the registry map.
    fn update<F: FnOnce(&mut Registry)>(&self, f: F) {
        let mut indexes = self.indexes.write();
        let mut next = Registry::clone(&indexes);
        f(&mut next);
        *indexes = Arc::new(next);
    }

    fn build(&self, name: &str, directory: &Path, definition: IndexDefinition) -> Result<Arc<dyn Index>> {
        let store = Arc::new(FileSegmentStore::open(directory)?);
        json_file::write_atomic(
            &directory.join(INDEX_METADATA_FILE),
            &IndexMetadata {
                name: name.to_string(),
                shape: definition.shape(),
            },
        )?;
        build_index(name, definition, store, &self.context)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::document::Value;
    use crate::tracker::compute_hash;

    fn by_name() -> IndexDefinition {
        IndexDefinition::map(|doc: &Document| {
            Ok(vec![Value::object([(
                "Name",
                doc.get_field("Name").cloned().unwrap_or_default(),
            )])])
        })
        .store_field("Name")
    }

    #[test]
    fn test_config_defaults() {
        let config = IndexStorageConfig::new("/data");
        assert_eq!(config.index_root(), PathBuf::from("/data/Index"));
        assert_eq!(
            config.mapped_results_dir(),
            PathBuf::from("/data/MappedResults")
        );

        let parsed: IndexStorageConfig =
            serde_json::from_str(r#"{"data_dir": "/srv/divan", "index_dir_name": "Indexes"}"#).unwrap();
        assert_eq!(parsed.index_root(), PathBuf::from("/srv/divan/Indexes"));
        assert_eq!(parsed.mapped_results_dir_name, "MappedResults");
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::open(IndexStorageConfig::new(dir.path())).unwrap();

        storage.create_index("Users/ByName", by_name()).unwrap();
        let err = storage.create_index("Users/ByName", by_name()).unwrap_err();
        assert!(err.is_already_exists());
        assert!(storage.create_index(" ", by_name()).is_err());
    }

    #[test]
    fn test_delete_removes_directory() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::open(IndexStorageConfig::new(dir.path())).unwrap();

        storage.create_index("Users/ByName", by_name()).unwrap();
        let directory = storage.index_directory("Users/ByName");
        assert!(directory.join(INDEX_METADATA_FILE).exists());

        storage.delete_index("Users/ByName").unwrap();
        assert!(!directory.exists());
        assert!(storage.list_index_names().is_empty());

        // The name can be reused.
        storage.create_index("Users/ByName", by_name()).unwrap();
    }

    #[test]
    fn test_open_index_requires_saved_index() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::open(IndexStorageConfig::new(dir.path())).unwrap();
        let err = storage.open_index("Missing", by_name()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_open_index_rejects_shape_change() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::open(IndexStorageConfig::new(dir.path())).unwrap();
        storage.create_index("Users/ByName", by_name()).unwrap();

        let aggregating = by_name().with_reduce(|_: &Value| None, |_: &str, _: &[Value]| Ok(Vec::new()));
        assert!(storage.open_index("Users/ByName", aggregating).is_err());
    }

    #[test]
    fn test_missing_index_bookkeeping_is_dropped_on_open() {
        let dir = TempDir::new().unwrap();
        let config = IndexStorageConfig::new(dir.path());
        {
            let tracker = MappedResultTracker::open(config.mapped_results_dir()).unwrap();
            tracker
                .record_contribution("Gone", "docs/1", "k", "{}", &compute_hash("Gone", "k"))
                .unwrap();
        }

        let storage = IndexStorage::open(config).unwrap();
        assert_eq!(storage.tracker().record_count("Gone"), 0);
        assert!(storage.tracker().index_names().is_empty());
    }
}
