//! Mapped-result tracker.
//!
//! For every (index, document) pair the tracker remembers which aggregation
//! keys the document contributed to and the serialized contributions
//! themselves. Evicting a document returns the keys it touched, which is how
//! the indexer learns what has to be re-reduced without rescanning the index.
//!
//! While no map or remove pass is in flight, the keys recorded for a document
//! are exactly the keys that document contributes to.
//!
//! Next to the contributions the tracker keeps each index's reduce task
//! outbox and indexing counters. All of an index's state is one snapshot file
//! (`<encoded index name>.json`), so the eviction of stale contributions and
//! the tasks that re-reduce their keys are committed together.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::task::{KeyQueue, ReduceTask};
use crate::util::json_file;

/// Identity hash of a contribution: SHA-256 of `index + "/" + reduce_key`.
///
/// Two documents contributing to the same key get the same hash; records are
/// never merged on it.
pub fn compute_hash(index: &str, reduce_key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(index.as_bytes());
    hasher.update(b"/");
    hasher.update(reduce_key.as_bytes());
    hasher.finalize().into()
}

/// One contribution of a document to an aggregation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedResult {
    pub index: String,
    pub document_id: String,
    pub reduce_key: String,
    /// Contribution in the tagged JSON form, see
    /// [`Value::to_tagged_json`](crate::document::Value::to_tagged_json).
    pub data: String,
    /// Hex encoded identity hash, see [`compute_hash`].
    pub hash: String,
}

/// Outcome counters of an index's write passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingStats {
    pub indexing_successes: u64,
    pub indexing_failures: u64,
    pub reduce_successes: u64,
    pub reduce_failures: u64,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

impl IndexingStats {
    pub fn record_indexing(&mut self, successes: usize, failures: usize) {
        self.indexing_successes += successes as u64;
        self.indexing_failures += failures as u64;
        self.last_indexed_at = Some(Utc::now());
    }

    pub fn record_reduce(&mut self, successes: usize, failures: usize) {
        self.reduce_successes += successes as u64;
        self.reduce_failures += failures as u64;
    }
}

/// Everything the tracker holds for one index.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexWork {
    index: String,
    #[serde(default)]
    documents: BTreeMap<String, Vec<MappedResult>>,
    #[serde(default)]
    tasks: KeyQueue,
    #[serde(default)]
    stats: IndexingStats,
    /// reduce key -> document ids; rebuilt on load
    #[serde(skip)]
    keys: BTreeMap<String, BTreeSet<String>>,
}

impl IndexWork {
    fn new(index: &str) -> Self {
        IndexWork {
            index: index.to_string(),
            ..Default::default()
        }
    }

    fn rebuild_keys(&mut self) {
        self.keys.clear();
        for (document_id, records) in &self.documents {
            for record in records {
                self.keys
                    .entry(record.reduce_key.clone())
                    .or_default()
                    .insert(document_id.clone());
            }
        }
    }
}

/// Persistent bookkeeping of mapped results and pending reduce work.
#[derive(Debug)]
pub struct MappedResultTracker {
    state: Mutex<HashMap<String, IndexWork>>,
    directory: Option<PathBuf>,
}

impl MappedResultTracker {
    /// A tracker that keeps its records in memory only.
    pub fn in_memory() -> Self {
        MappedResultTracker {
            state: Mutex::new(HashMap::new()),
            directory: None,
        }
    }

    /// Open a tracker persisted under `directory`, loading every index
    /// snapshot found there.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let mut state = HashMap::new();
        for dir_entry in fs::read_dir(&directory)? {
            let path = dir_entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(mut work) = json_file::read::<IndexWork>(&path)? else {
                warn!("Skipping empty mapped-result snapshot {}", path.display());
                continue;
            };
            work.rebuild_keys();
            state.insert(work.index.clone(), work);
        }

        debug!(
            "Loaded mapped results for {} indexes from {}",
            state.len(),
            directory.display()
        );
        Ok(MappedResultTracker {
            state: Mutex::new(state),
            directory: Some(directory),
        })
    }

    /// Run several tracker operations under one lock. Every index they touch
    /// is persisted once, as a single snapshot.
    pub fn batch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TrackerBatch<'_>) -> T,
    {
        let mut batch = TrackerBatch {
            state: self.state.lock(),
            dirty: BTreeSet::new(),
        };
        let result = f(&mut batch);
        if let Some(directory) = &self.directory {
            for index in &batch.dirty {
                let path = directory.join(format!("{}.json", json_file::encode_name(index)));
                match batch.state.get(index) {
                    Some(work) => json_file::write_atomic(&path, work)?,
                    None if path.exists() => fs::remove_file(&path)?,
                    None => {}
                }
            }
        }
        Ok(result)
    }

    /// Persist a contribution. Recording the same arguments twice keeps a
    /// single record.
    pub fn record_contribution(
        &self,
        index: &str,
        document_id: &str,
        reduce_key: &str,
        data: &str,
        hash: &[u8],
    ) -> Result<()> {
        self.batch(|batch| batch.record_contribution(index, document_id, reduce_key, data, hash))
    }

    /// Remove every record of a document under an index, returning the
    /// distinct aggregation keys it had contributed to.
    pub fn evict_document(&self, index: &str, document_id: &str) -> Result<BTreeSet<String>> {
        self.batch(|batch| batch.evict_document(index, document_id))
    }

    /// Drop everything held for an index: records, pending tasks and
    /// counters. Returns the number of documents dropped.
    pub fn evict_index(&self, index: &str) -> Result<usize> {
        self.batch(|batch| batch.evict_index(index))
    }

    /// Current contributions to an aggregation key, ordered by document id.
    pub fn contributions_for_key(&self, index: &str, reduce_key: &str) -> Vec<MappedResult> {
        let state = self.state.lock();
        let Some(work) = state.get(index) else {
            return Vec::new();
        };
        let Some(document_ids) = work.keys.get(reduce_key) else {
            return Vec::new();
        };

        document_ids
            .iter()
            .filter_map(|id| work.documents.get(id))
            .flatten()
            .filter(|record| record.reduce_key == reduce_key)
            .cloned()
            .collect()
    }

    /// Keys currently recorded for a document.
    pub fn reduce_keys_for_document(&self, index: &str, document_id: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .get(index)
            .and_then(|work| work.documents.get(document_id))
            .map(|records| records.iter().map(|r| r.reduce_key.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of records held for an index.
    pub fn record_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .get(index)
            .map(|work| work.documents.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Names of the indexes with tracked state, sorted.
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self, index: &str) -> IndexingStats {
        self.state
            .lock()
            .get(index)
            .map(|work| work.stats.clone())
            .unwrap_or_default()
    }

    /// Pending tasks of every index, queued before running, grouped by index.
    pub fn pending_tasks(&self) -> Vec<ReduceTask> {
        let state = self.state.lock();
        let mut indexes: Vec<&IndexWork> = state.values().collect();
        indexes.sort_by(|a, b| a.index.cmp(&b.index));

        indexes
            .into_iter()
            .flat_map(|work| {
                work.tasks
                    .queued()
                    .chain(work.tasks.running())
                    .map(move |key| ReduceTask::new(work.index.as_str(), key))
            })
            .collect()
    }

    /// Mark up to `max` queued tasks running and return them.
    pub fn take_tasks(&self, max: usize) -> Result<Vec<ReduceTask>> {
        self.batch(|batch| batch.take_tasks(max))
    }

    /// Forget a task whose reduce pass has run.
    pub fn complete_task(&self, task: &ReduceTask) -> Result<()> {
        self.batch(|batch| {
            batch.with_tasks(&task.index, |tasks| tasks.complete(&task.reduce_key));
        })
    }

    /// Return a running task to the queue so it runs again later.
    pub fn release_task(&self, task: &ReduceTask) -> Result<()> {
        self.batch(|batch| {
            batch.with_tasks(&task.index, |tasks| tasks.release(&task.reduce_key));
        })
    }
}

/// Tracker operations applied under a single lock; see
/// [`MappedResultTracker::batch`].
pub struct TrackerBatch<'a> {
    state: MutexGuard<'a, HashMap<String, IndexWork>>,
    dirty: BTreeSet<String>,
}

impl TrackerBatch<'_> {
    fn work(&mut self, index: &str) -> &mut IndexWork {
        self.dirty.insert(index.to_string());
        self.state
            .entry(index.to_string())
            .or_insert_with(|| IndexWork::new(index))
    }

    pub fn record_contribution(
        &mut self,
        index: &str,
        document_id: &str,
        reduce_key: &str,
        data: &str,
        hash: &[u8],
    ) {
        let record = MappedResult {
            index: index.to_string(),
            document_id: document_id.to_string(),
            reduce_key: reduce_key.to_string(),
            data: data.to_string(),
            hash: hex::encode(hash),
        };

        let work = self.work(index);
        let records = work.documents.entry(document_id.to_string()).or_default();
        match records
            .iter_mut()
            .find(|r| r.reduce_key == record.reduce_key && r.data == record.data)
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }

        work.keys
            .entry(reduce_key.to_string())
            .or_default()
            .insert(document_id.to_string());
    }

    pub fn evict_document(&mut self, index: &str, document_id: &str) -> BTreeSet<String> {
        let Some(records) = self
            .state
            .get_mut(index)
            .and_then(|work| work.documents.remove(document_id))
        else {
            return BTreeSet::new();
        };

        let reduce_keys: BTreeSet<String> = records.into_iter().map(|r| r.reduce_key).collect();
        let work = self.work(index);
        for key in &reduce_keys {
            if let Some(ids) = work.keys.get_mut(key) {
                ids.remove(document_id);
                if ids.is_empty() {
                    work.keys.remove(key);
                }
            }
        }
        reduce_keys
    }

    pub fn evict_index(&mut self, index: &str) -> usize {
        match self.state.remove(index) {
            Some(work) => {
                self.dirty.insert(index.to_string());
                work.documents.len()
            }
            None => 0,
        }
    }

    /// Queue a reduce of `reduce_key`. Returns whether the task is new.
    pub fn enqueue(&mut self, index: &str, reduce_key: &str) -> bool {
        let added = self.work(index).tasks.push(reduce_key);
        if added {
            debug!("Enqueue reduce task {index} / {reduce_key}");
        }
        added
    }

    pub fn record_stats<F: FnOnce(&mut IndexingStats)>(&mut self, index: &str, f: F) {
        f(&mut self.work(index).stats);
    }

    /// Mark up to `max` queued tasks running, index by index in name order.
    pub fn take_tasks(&mut self, max: usize) -> Vec<ReduceTask> {
        let mut indexes: Vec<String> = self
            .state
            .iter()
            .filter(|(_, work)| work.tasks.queued().next().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        indexes.sort();

        let mut taken = Vec::new();
        for index in indexes {
            let work = self.work(&index);
            while taken.len() < max {
                match work.tasks.pop() {
                    Some(key) => taken.push(ReduceTask::new(index.as_str(), key)),
                    None => break,
                }
            }
            if taken.len() >= max {
                break;
            }
        }
        taken
    }

    fn with_tasks<F: FnOnce(&mut KeyQueue) -> bool>(&mut self, index: &str, f: F) {
        if let Some(work) = self.state.get_mut(index)
            && f(&mut work.tasks)
        {
            self.dirty.insert(index.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn record(tracker: &MappedResultTracker, doc: &str, key: &str, data: &str) {
        tracker
            .record_contribution("Orders/ByCustomer", doc, key, data, &compute_hash("Orders/ByCustomer", key))
            .unwrap();
    }

    #[test]
    fn test_record_then_evict_returns_keys() {
        let tracker = MappedResultTracker::in_memory();
        record(&tracker, "orders/1", "customers/1", r#"{"Count":1}"#);
        record(&tracker, "orders/1", "customers/2", r#"{"Count":1}"#);
        record(&tracker, "orders/2", "customers/1", r#"{"Count":1}"#);

        let keys = tracker.evict_document("Orders/ByCustomer", "orders/1").unwrap();
        assert_eq!(
            keys,
            BTreeSet::from(["customers/1".to_string(), "customers/2".to_string()])
        );
        assert!(
            tracker
                .evict_document("Orders/ByCustomer", "orders/1")
                .unwrap()
                .is_empty()
        );

        let remaining = tracker.contributions_for_key("Orders/ByCustomer", "customers/1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].document_id, "orders/2");
        assert!(
            tracker
                .contributions_for_key("Orders/ByCustomer", "customers/2")
                .is_empty()
        );
    }

    #[test]
    fn test_record_is_idempotent() {
        let tracker = MappedResultTracker::in_memory();
        record(&tracker, "orders/1", "customers/1", r#"{"Count":1}"#);
        record(&tracker, "orders/1", "customers/1", r#"{"Count":1}"#);
        assert_eq!(tracker.record_count("Orders/ByCustomer"), 1);

        record(&tracker, "orders/1", "customers/1", r#"{"Count":2}"#);
        assert_eq!(tracker.record_count("Orders/ByCustomer"), 2);
    }

    #[test]
    fn test_same_key_from_different_documents_accumulates() {
        let tracker = MappedResultTracker::in_memory();
        record(&tracker, "orders/1", "customers/1", r#"{"Count":1}"#);
        record(&tracker, "orders/2", "customers/1", r#"{"Count":1}"#);

        let contributions = tracker.contributions_for_key("Orders/ByCustomer", "customers/1");
        assert_eq!(contributions.len(), 2);
        assert_eq!(contributions[0].hash, contributions[1].hash);
        assert_eq!(
            contributions[0].hash,
            hex::encode(compute_hash("Orders/ByCustomer", "customers/1"))
        );
    }

    #[test]
    fn test_indexes_are_isolated() {
        let tracker = MappedResultTracker::in_memory();
        tracker
            .record_contribution("A", "docs/1", "k", "{}", &compute_hash("A", "k"))
            .unwrap();
        tracker
            .record_contribution("B", "docs/1", "k", "{}", &compute_hash("B", "k"))
            .unwrap();

        assert_eq!(tracker.evict_document("A", "docs/1").unwrap().len(), 1);
        assert_eq!(tracker.contributions_for_key("B", "k").len(), 1);
        assert_eq!(tracker.evict_index("B").unwrap(), 1);
        assert!(tracker.contributions_for_key("B", "k").is_empty());
    }

    #[test]
    fn test_tasks_take_complete_release() {
        let tracker = MappedResultTracker::in_memory();
        let added = tracker
            .batch(|batch| {
                [("B", "k1"), ("A", "k1"), ("A", "k2"), ("A", "k1")]
                    .iter()
                    .filter(|(index, key)| batch.enqueue(index, key))
                    .count()
            })
            .unwrap();
        assert_eq!(added, 3);

        let taken = tracker.take_tasks(2).unwrap();
        assert_eq!(taken, vec![ReduceTask::new("A", "k1"), ReduceTask::new("A", "k2")]);
        // Running tasks stay pending until completed.
        assert_eq!(tracker.pending_tasks().len(), 3);

        tracker.complete_task(&taken[0]).unwrap();
        tracker.release_task(&taken[1]).unwrap();
        assert_eq!(
            tracker.pending_tasks(),
            vec![ReduceTask::new("A", "k2"), ReduceTask::new("B", "k1")]
        );

        tracker.evict_index("A").unwrap();
        assert_eq!(tracker.pending_tasks(), vec![ReduceTask::new("B", "k1")]);
    }

    #[test]
    fn test_eviction_and_tasks_are_one_snapshot() {
        let dir = TempDir::new().unwrap();

        {
            let tracker = MappedResultTracker::open(dir.path()).unwrap();
            record(&tracker, "orders/1", "customers/1", r#"{"Count":1}"#);
            tracker
                .batch(|batch| {
                    for key in batch.evict_document("Orders/ByCustomer", "orders/1") {
                        batch.enqueue("Orders/ByCustomer", &key);
                    }
                    batch.record_stats("Orders/ByCustomer", |stats| stats.record_indexing(1, 0));
                })
                .unwrap();
            tracker.take_tasks(10).unwrap();
        }

        assert!(dir.path().join("Orders%2FByCustomer.json").exists());
        let tracker = MappedResultTracker::open(dir.path()).unwrap();
        assert_eq!(tracker.record_count("Orders/ByCustomer"), 0);
        // The task was running when the process stopped, so it is queued again.
        assert_eq!(
            tracker.pending_tasks(),
            vec![ReduceTask::new("Orders/ByCustomer", "customers/1")]
        );
        assert_eq!(tracker.stats("Orders/ByCustomer").indexing_successes, 1);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let tracker = MappedResultTracker::open(dir.path()).unwrap();
            record(&tracker, "orders/1", "customers/1", r#"{"Count":1}"#);
            tracker
                .record_contribution("Other", "docs/1", "k", "{}", &compute_hash("Other", "k"))
                .unwrap();
            tracker.evict_index("Other").unwrap();
        }

        assert!(!dir.path().join("Other.json").exists());
        let tracker = MappedResultTracker::open(dir.path()).unwrap();
        assert_eq!(
            tracker.reduce_keys_for_document("Orders/ByCustomer", "orders/1"),
            BTreeSet::from(["customers/1".to_string()])
        );
        assert_eq!(
            tracker
                .contributions_for_key("Orders/ByCustomer", "customers/1")
                .len(),
            1
        );
    }
}
