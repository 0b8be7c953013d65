//! Deferred reduce work.
//!
//! Map and remove passes do not re-aggregate immediately. They queue the
//! affected aggregation keys of an index in a [`KeyQueue`], which the
//! [`MappedResultTracker`](crate::tracker::MappedResultTracker) persists in
//! the same snapshot as the contributions. A scheduler takes keys out as
//! [`ReduceTask`]s, runs the reduce pass, and then completes or releases each
//! task; no ordering is promised across indexes.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Re-aggregate one key of one index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReduceTask {
    pub index: String,
    pub reduce_key: String,
}

impl ReduceTask {
    pub fn new<I: Into<String>, K: Into<String>>(index: I, reduce_key: K) -> Self {
        ReduceTask {
            index: index.into(),
            reduce_key: reduce_key.into(),
        }
    }
}

/// Pending reduce keys of one index.
///
/// A key is either queued (deduplicated, oldest first) or running (taken by a
/// scheduler and not yet completed). A running key can be queued again, since
/// contributions may change while its reduce is in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyQueue {
    queued: VecDeque<String>,
    members: BTreeSet<String>,
    running: BTreeSet<String>,
}

impl KeyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a key unless it is already queued. Returns whether it was added.
    pub fn push(&mut self, key: &str) -> bool {
        if !self.members.insert(key.to_string()) {
            return false;
        }
        self.queued.push_back(key.to_string());
        true
    }

    /// Take the oldest queued key and mark it running.
    pub fn pop(&mut self) -> Option<String> {
        let key = self.queued.pop_front()?;
        self.members.remove(&key);
        self.running.insert(key.clone());
        Some(key)
    }

    /// Forget a running key whose reduce has finished.
    pub fn complete(&mut self, key: &str) -> bool {
        self.running.remove(key)
    }

    /// Put a running key back in the queue.
    pub fn release(&mut self, key: &str) -> bool {
        if !self.running.remove(key) {
            return false;
        }
        self.push(key);
        true
    }

    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.queued.iter().map(String::as_str)
    }

    pub fn running(&self) -> impl Iterator<Item = &str> {
        self.running.iter().map(String::as_str)
    }

    /// Queued plus running keys.
    pub fn len(&self) -> usize {
        self.queued.len() + self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.running.is_empty()
    }
}

#[derive(Serialize)]
struct KeyQueueRef<'a> {
    queued: &'a VecDeque<String>,
    running: &'a BTreeSet<String>,
}

#[derive(Deserialize)]
struct KeyQueueSnapshot {
    #[serde(default)]
    queued: Vec<String>,
    #[serde(default)]
    running: Vec<String>,
}

impl Serialize for KeyQueue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        KeyQueueRef {
            queued: &self.queued,
            running: &self.running,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeyQueue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let snapshot = KeyQueueSnapshot::deserialize(deserializer)?;
        // Keys that were running when the snapshot was written never
        // completed, so they run again first.
        let mut queue = KeyQueue::new();
        for key in snapshot.running.iter().chain(&snapshot.queued) {
            queue.push(key);
        }
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deduplicated() {
        let mut queue = KeyQueue::new();
        assert!(queue.push("customers/1"));
        assert!(!queue.push("customers/1"));
        assert!(queue.push("customers/2"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.queued().collect::<Vec<_>>(), vec!["customers/1", "customers/2"]);
    }

    #[test]
    fn test_pop_complete_and_release() {
        let mut queue = KeyQueue::new();
        for key in ["a", "b"] {
            queue.push(key);
        }

        assert_eq!(queue.pop().as_deref(), Some("a"));
        assert_eq!(queue.running().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(queue.len(), 2);

        // A running key can be queued again.
        assert!(queue.push("a"));
        assert!(queue.complete("a"));
        assert!(!queue.complete("a"));
        assert_eq!(queue.queued().collect::<Vec<_>>(), vec!["b", "a"]);

        assert_eq!(queue.pop().as_deref(), Some("b"));
        assert!(queue.release("b"));
        assert_eq!(queue.queued().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(queue.running().next().is_none());
    }

    #[test]
    fn test_running_keys_are_requeued_after_reload() {
        let mut queue = KeyQueue::new();
        for key in ["a", "b", "c"] {
            queue.push(key);
        }
        queue.pop();

        let json = serde_json::to_string(&queue).unwrap();
        let reloaded: KeyQueue = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.queued().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert!(reloaded.running().next().is_none());
    }
}
