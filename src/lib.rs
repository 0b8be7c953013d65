//! # Divan
//!
//! The indexing core of a document database.
//!
//! ## Features
//!
//! - Registry of named indexes with serialized create/delete
//! - Incremental map/reduce with stale-result eviction and a durable
//!   reduce task outbox
//! - Typed predicates compiled into the index query language
//! - Hi/lo document key generation

pub mod cli;
pub mod document;
pub mod encoding;
pub mod error;
pub mod index;
pub mod keygen;
pub mod query;
pub mod scheduler;
pub mod segment;
pub mod storage;
pub mod task;
pub mod tracker;
pub mod util;

pub mod prelude {
    pub use crate::document::{Document, Value};
    pub use crate::error::{DivanError, Result};
    pub use crate::index::{Index, IndexDefinition, IndexQuery, IndexingReport, QueryResult};
    pub use crate::query::{Query, QueryCompiler, field};
    pub use crate::scheduler::{ReduceScheduler, SchedulerConfig};
    pub use crate::storage::{IndexStorage, IndexStorageConfig};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
