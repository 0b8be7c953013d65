//! Segment stores: the per-index storage of searchable entries.
//!
//! The indexing core treats a segment store as an opaque collaborator that
//! can add entries, delete them by an exact field value, and search them with
//! the index query language. Two implementations are provided:
//!
//! - [`MemorySegmentStore`]: in-memory, for tests and temporary indexes
//! - [`FileSegmentStore`]: keeps its entries in a JSON snapshot inside the
//!   index directory, rewritten after every mutation
//!
//! # Example
//!
//! ```
//! use divan::segment::{IndexEntry, MemorySegmentStore, SegmentStore};
//!
//! # fn main() -> divan::error::Result<()> {
//! let store = MemorySegmentStore::new();
//! store.add(IndexEntry::new().with_field("Name", "ayende", true))?;
//!
//! let results = store.search("Name:ayende ", 0, 10)?;
//! assert_eq!(results.total, 1);
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod file;
pub mod memory;

pub use file::FileSegmentStore;
pub use memory::MemorySegmentStore;

/// One indexed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub name: String,
    pub value: String,
    /// Whether the value is returned by searches.
    pub stored: bool,
}

/// A searchable entry: a bag of (possibly repeated) fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexEntry {
    pub fields: Vec<IndexField>,
}

impl IndexEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field value.
    pub fn add_field<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V, stored: bool) {
        self.fields.push(IndexField {
            name: name.into(),
            value: value.into(),
            stored,
        });
    }

    /// Builder form of [`IndexEntry::add_field`].
    pub fn with_field<N: Into<String>, V: Into<String>>(
        mut self,
        name: N,
        value: V,
        stored: bool,
    ) -> Self {
        self.add_field(name, value, stored);
        self
    }

    /// Every value of a field, indexed or stored.
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.name == name)
            .map(|f| f.value.as_str())
            .collect()
    }

    /// First value of a field.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Fields that are returned by searches, in insertion order.
    pub fn stored_fields(&self) -> impl Iterator<Item = &IndexField> {
        self.fields.iter().filter(|f| f.stored)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Matching entries in the requested page, in index order.
    pub entries: Vec<IndexEntry>,
    /// Total number of matches, regardless of paging.
    pub total: usize,
}

/// Storage of one index's entries.
///
/// Implementations are shared between one writer and many readers; a search
/// observes the entries as of the moment it starts.
pub trait SegmentStore: Send + Sync + Debug {
    /// Add one entry.
    fn add(&self, entry: IndexEntry) -> Result<()>;

    /// Delete every entry having `field == value`. Returns how many were removed.
    fn delete_by_field(&self, field: &str, value: &str) -> Result<usize>;

    /// Delete every entry having `field == value` and add `entries` in one
    /// step, so readers never observe the intermediate state.
    fn replace_by_field(&self, field: &str, value: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        let deleted = self.delete_by_field(field, value)?;
        for entry in entries {
            self.add(entry)?;
        }
        Ok(deleted)
    }

    /// Search with a query string. `start` and `page_size` select the page;
    /// the returned total counts every match.
    fn search(&self, query: &str, start: usize, page_size: usize) -> Result<SearchResults>;

    /// Number of entries currently stored.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the store. Later operations fail.
    fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_accessors() {
        let entry = IndexEntry::new()
            .with_field("__document_id", "users/1", true)
            .with_field("Tags", "a", true)
            .with_field("Tags", "b", true)
            .with_field("Age_Range", "0x00000003", false);

        assert_eq!(entry.values("Tags"), vec!["a", "b"]);
        assert_eq!(entry.first("__document_id"), Some("users/1"));
        assert_eq!(entry.first("Missing"), None);

        let stored: Vec<&str> = entry.stored_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(stored, vec!["__document_id", "Tags", "Tags"]);
    }
}
