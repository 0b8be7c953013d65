//! Hi/lo document key generation.
//!
//! Each generator reserves a block of `capacity` ids at a time by bumping a
//! counter document in a [`CounterStore`], then hands ids out of the block
//! locally. The counter is updated with optimistic concurrency; conflicts with
//! other generators are retried here and never reach the caller.
//!
//! ```
//! use std::sync::Arc;
//! use divan::keygen::{HiLoConfig, HiLoKeyGenerator, MemoryCounterStore};
//!
//! # fn main() -> divan::error::Result<()> {
//! let generator = HiLoKeyGenerator::new(Arc::new(MemoryCounterStore::new()), HiLoConfig::default());
//! assert_eq!(generator.generate_document_key("Users")?, "users/1");
//! assert_eq!(generator.generate_document_key("Users")?, "users/2");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{DivanError, Result};

/// Attempts at reserving a block before giving up.
const MAX_RESERVE_ATTEMPTS: usize = 64;

/// Configuration for [`HiLoKeyGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiLoConfig {
    /// Ids per reserved block.
    pub capacity: i64,
    /// Key of the counter document.
    pub counter_key: String,
}

impl Default for HiLoConfig {
    fn default() -> Self {
        HiLoConfig {
            capacity: 1024,
            counter_key: "Raven/KeyGenerators/Hilo".to_string(),
        }
    }
}

/// A counter document with its version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDocument {
    /// Next block number to hand out.
    pub value: i64,
    pub etag: String,
}

/// Durable storage of counter documents.
pub trait CounterStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> Result<Option<CounterDocument>>;

    /// Write `value` if the stored etag equals `expected_etag` (`None`: the
    /// document must not exist yet). Fails with a concurrency error otherwise.
    /// Returns the new etag.
    fn put(&self, key: &str, expected_etag: Option<&str>, value: i64) -> Result<String>;
}

/// In-process counter store.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    documents: Mutex<HashMap<String, CounterDocument>>,
    next_etag: Mutex<u64>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, key: &str) -> Result<Option<CounterDocument>> {
        Ok(self.documents.lock().get(key).cloned())
    }

    fn put(&self, key: &str, expected_etag: Option<&str>, value: i64) -> Result<String> {
        let mut documents = self.documents.lock();
        let current = documents.get(key).map(|doc| doc.etag.as_str());
        if current != expected_etag {
            return Err(DivanError::concurrency(format!(
                "put of {key} expected etag {expected_etag:?} but found {current:?}"
            )));
        }

        let etag = {
            let mut next = self.next_etag.lock();
            *next += 1;
            format!("{:016x}", *next)
        };
        documents.insert(
            key.to_string(),
            CounterDocument {
                value,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }
}

#[derive(Debug)]
struct Block {
    hi: i64,
    lo: i64,
}

/// Generates unique ids as `(hi - 1) * capacity + lo`, `lo` in
/// `1..=capacity`.
#[derive(Debug)]
pub struct HiLoKeyGenerator {
    store: Arc<dyn CounterStore>,
    config: HiLoConfig,
    block: Mutex<Block>,
}

impl HiLoKeyGenerator {
    pub fn new(store: Arc<dyn CounterStore>, config: HiLoConfig) -> Self {
        let capacity = config.capacity.max(1);
        HiLoKeyGenerator {
            store,
            config: HiLoConfig { capacity, ..config },
            // Exhausted, so the first call reserves a block.
            block: Mutex::new(Block { hi: 0, lo: capacity }),
        }
    }

    /// Next unique id.
    pub fn next_id(&self) -> Result<i64> {
        let mut block = self.block.lock();
        if block.lo >= self.config.capacity {
            block.hi = self.reserve_block()?;
            block.lo = 0;
        }
        block.lo += 1;
        Ok((block.hi - 1) * self.config.capacity + block.lo)
    }

    /// Key for a new document of type `tag`, e.g. `users/1`.
    pub fn generate_document_key(&self, tag: &str) -> Result<String> {
        Ok(format!("{}/{}", tag.to_lowercase(), self.next_id()?))
    }

    fn reserve_block(&self) -> Result<i64> {
        let key = self.config.counter_key.as_str();
        for attempt in 1..=MAX_RESERVE_ATTEMPTS {
            let reserved = match self.store.get(key)? {
                None => self.store.put(key, None, 2).map(|_| 1),
                Some(doc) => self
                    .store
                    .put(key, Some(&doc.etag), doc.value + 1)
                    .map(|_| doc.value),
            };
            match reserved {
                Ok(hi) => {
                    debug!("Reserved id block {hi} from {key}");
                    return Ok(hi);
                }
                Err(e) if e.is_concurrency() => {
                    debug!("Conflict reserving id block from {key} (attempt {attempt}), retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(DivanError::concurrency(format!(
            "could not reserve an id block from {key} after {MAX_RESERVE_ATTEMPTS} attempts"
        )))
    }
}
