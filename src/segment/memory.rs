//! In-memory segment store for testing and temporary indexes.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{DivanError, Result};
use crate::query::parser;
use crate::segment::{IndexEntry, SearchResults, SegmentStore};

/// A segment store holding its entries in memory.
#[derive(Debug, Default)]
pub struct MemorySegmentStore {
    entries: RwLock<Vec<IndexEntry>>,
    closed: AtomicBool,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with entries.
    pub fn with_entries(entries: Vec<IndexEntry>) -> Self {
        MemorySegmentStore {
            entries: RwLock::new(entries),
            closed: AtomicBool::new(false),
        }
    }

    /// Copy of every entry, in index order.
    pub fn snapshot(&self) -> Vec<IndexEntry> {
        self.entries.read().clone()
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DivanError::storage("Segment store is closed"))
        } else {
            Ok(())
        }
    }
}

impl SegmentStore for MemorySegmentStore {
    fn add(&self, entry: IndexEntry) -> Result<()> {
        self.check_closed()?;
        self.entries.write().push(entry);
        Ok(())
    }

    fn delete_by_field(&self, field: &str, value: &str) -> Result<usize> {
        self.check_closed()?;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| !entry.values(field).contains(&value));
        Ok(before - entries.len())
    }

    fn replace_by_field(&self, field: &str, value: &str, new_entries: Vec<IndexEntry>) -> Result<usize> {
        self.check_closed()?;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| !entry.values(field).contains(&value));
        let deleted = before - entries.len();
        entries.extend(new_entries);
        Ok(deleted)
    }

    fn search(&self, query: &str, start: usize, page_size: usize) -> Result<SearchResults> {
        self.check_closed()?;
        let parsed = parser::parse(query)?;

        let entries = self.entries.read();
        let mut total = 0;
        let mut page = Vec::new();
        for entry in entries.iter() {
            if !parsed.matches(&|field: &str| entry.values(field)) {
                continue;
            }
            if total >= start && page.len() < page_size {
                page.push(entry.clone());
            }
            total += 1;
        }

        Ok(SearchResults {
            entries: page,
            total,
        })
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str, age_hex: &str) -> IndexEntry {
        IndexEntry::new()
            .with_field("__document_id", id, true)
            .with_field("Name", name, true)
            .with_field("Age_Range", age_hex, false)
    }

    #[test]
    fn test_add_search_delete() {
        let store = MemorySegmentStore::new();
        store.add(user("users/1", "ayende", "0x00000003")).unwrap();
        store.add(user("users/2", "oren", "0x00000010")).unwrap();
        assert_eq!(store.len(), 2);

        let results = store.search("Name:ayende ", 0, 10).unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.entries[0].first("__document_id"), Some("users/1"));

        let results = store.search("Age_Range:[0x00000004 TO NULL] ", 0, 10).unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.entries[0].first("Name"), Some("oren"));

        assert_eq!(store.delete_by_field("__document_id", "users/1").unwrap(), 1);
        assert_eq!(store.delete_by_field("__document_id", "users/1").unwrap(), 0);
        assert_eq!(store.search("", 0, 10).unwrap().total, 1);
    }

    #[test]
    fn test_paging_reports_total() {
        let store = MemorySegmentStore::new();
        for i in 0..25 {
            store
                .add(IndexEntry::new().with_field("Type", "user", true).with_field("N", i.to_string(), true))
                .unwrap();
        }

        let page = store.search("Type:user", 20, 10).unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.entries.len(), 5);
        assert_eq!(page.entries[0].first("N"), Some("20"));

        let empty_page = store.search("Type:user", 0, 0).unwrap();
        assert_eq!(empty_page.total, 25);
        assert!(empty_page.entries.is_empty());
    }

    #[test]
    fn test_replace_by_field() {
        let store = MemorySegmentStore::new();
        store
            .add(IndexEntry::new().with_field("__reduce_key", "a", false).with_field("Count", "1", true))
            .unwrap();
        store
            .add(IndexEntry::new().with_field("__reduce_key", "b", false).with_field("Count", "7", true))
            .unwrap();

        let replaced = store
            .replace_by_field(
                "__reduce_key",
                "a",
                vec![IndexEntry::new().with_field("__reduce_key", "a", false).with_field("Count", "2", true)],
            )
            .unwrap();
        assert_eq!(replaced, 1);

        let results = store.search("__reduce_key:a", 0, 10).unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.entries[0].first("Count"), Some("2"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = MemorySegmentStore::new();
        store.close().unwrap();
        assert!(store.add(IndexEntry::new()).is_err());
        assert!(store.search("", 0, 10).is_err());
    }
}
