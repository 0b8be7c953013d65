//! File-backed segment store.
//!
//! Entries live in memory and are written to `segments.json` inside the index
//! directory after every mutation. The directory is created on open.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{DivanError, Result};
use crate::segment::{IndexEntry, MemorySegmentStore, SearchResults, SegmentStore};
use crate::util::json_file;

/// Name of the entry snapshot inside an index directory.
pub const SEGMENTS_FILE: &str = "segments.json";

/// A segment store persisted to a directory.
#[derive(Debug)]
pub struct FileSegmentStore {
    directory: PathBuf,
    inner: MemorySegmentStore,
}

impl FileSegmentStore {
    /// Open (or create) the store in `directory`.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();

        if !directory.exists() {
            std::fs::create_dir_all(&directory)?;
        }
        if !directory.is_dir() {
            return Err(DivanError::storage(format!(
                "Path is not a directory: {}",
                directory.display()
            )));
        }

        let entries: Vec<IndexEntry> =
            json_file::read(&directory.join(SEGMENTS_FILE))?.unwrap_or_default();
        debug!(
            "Opened segment store at {} with {} entries",
            directory.display(),
            entries.len()
        );

        Ok(FileSegmentStore {
            directory,
            inner: MemorySegmentStore::with_entries(entries),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn persist(&self) -> Result<()> {
        json_file::write_atomic(&self.directory.join(SEGMENTS_FILE), &self.inner.snapshot())
    }
}

impl SegmentStore for FileSegmentStore {
    fn add(&self, entry: IndexEntry) -> Result<()> {
        self.inner.add(entry)?;
        self.persist()
    }

    fn delete_by_field(&self, field: &str, value: &str) -> Result<usize> {
        let deleted = self.inner.delete_by_field(field, value)?;
        if deleted > 0 {
            self.persist()?;
        }
        Ok(deleted)
    }

    fn replace_by_field(&self, field: &str, value: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        let deleted = self.inner.replace_by_field(field, value, entries)?;
        self.persist()?;
        Ok(deleted)
    }

    fn search(&self, query: &str, start: usize, page_size: usize) -> Result<SearchResults> {
        self.inner.search(query, start, page_size)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
