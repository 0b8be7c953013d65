//! Index definitions: the map, group-by and reduce functions of an index.
//!
//! Functions are plain Rust closures (or any type implementing the traits)
//! over tagged [`Value`]s, so documents of any shape can be indexed.
//!
//! ```
//! use divan::document::Value;
//! use divan::index::IndexDefinition;
//!
//! // Count orders per customer.
//! let definition = IndexDefinition::map(|doc: &divan::document::Document| {
//!     Ok(vec![Value::object([
//!         ("Customer", doc.get_field("Customer").cloned().unwrap_or_default()),
//!         ("Count", Value::from(1)),
//!     ])])
//! })
//! .with_reduce(
//!     |contribution: &Value| contribution.get("Customer").cloned(),
//!     |key: &str, contributions: &[Value]| {
//!         let count: i64 = contributions.iter().filter_map(|c| c.get("Count")?.as_i64()).sum();
//!         Ok(vec![Value::object([("Customer", Value::from(key)), ("Count", Value::from(count))])])
//!     },
//! );
//! assert!(definition.is_map_reduce());
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::{Document, Value};
use crate::error::{DivanError, Result};

/// Turns a document into zero or more contributions.
pub trait MapFunction: Send + Sync {
    fn map(&self, document: &Document) -> Result<Vec<Value>>;
}

impl<F> MapFunction for F
where
    F: Fn(&Document) -> Result<Vec<Value>> + Send + Sync,
{
    fn map(&self, document: &Document) -> Result<Vec<Value>> {
        self(document)
    }
}

/// Extracts the aggregation key of a contribution. `None` or `Null` skips
/// the contribution.
pub trait GroupByFunction: Send + Sync {
    fn group_key(&self, contribution: &Value) -> Option<Value>;
}

impl<F> GroupByFunction for F
where
    F: Fn(&Value) -> Option<Value> + Send + Sync,
{
    fn group_key(&self, contribution: &Value) -> Option<Value> {
        self(contribution)
    }
}

/// Aggregates every contribution sharing a key into reduced outputs.
pub trait ReduceFunction: Send + Sync {
    fn reduce(&self, reduce_key: &str, contributions: &[Value]) -> Result<Vec<Value>>;
}

impl<F> ReduceFunction for F
where
    F: Fn(&str, &[Value]) -> Result<Vec<Value>> + Send + Sync,
{
    fn reduce(&self, reduce_key: &str, contributions: &[Value]) -> Result<Vec<Value>> {
        self(reduce_key, contributions)
    }
}

/// Group-by and reduce halves of an aggregating index.
#[derive(Clone)]
pub struct ReduceDefinition {
    pub group_by: Arc<dyn GroupByFunction>,
    pub reduce: Arc<dyn ReduceFunction>,
}

/// The persisted shape of a definition, written as `index.json` next to the
/// index's entries. Functions cannot be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexShape {
    pub map_reduce: bool,
    #[serde(default)]
    pub stored_fields: BTreeSet<String>,
}

/// Immutable description of what an index computes.
#[derive(Clone)]
pub struct IndexDefinition {
    map: Arc<dyn MapFunction>,
    reduce: Option<ReduceDefinition>,
    stored_fields: BTreeSet<String>,
    detached: bool,
}

impl IndexDefinition {
    /// A plain index whose entries are the map function's outputs.
    pub fn map<M>(map: M) -> Self
    where
        M: Fn(&Document) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        IndexDefinition {
            map: Arc::new(map),
            reduce: None,
            stored_fields: BTreeSet::new(),
            detached: false,
        }
    }

    /// Turn the definition into an aggregating (map/reduce) one.
    pub fn with_reduce<G, R>(mut self, group_by: G, reduce: R) -> Self
    where
        G: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
        R: Fn(&str, &[Value]) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.reduce = Some(ReduceDefinition {
            group_by: Arc::new(group_by),
            reduce: Arc::new(reduce),
        });
        self
    }

    /// Build a definition from trait objects, for map and reduce logic
    /// implemented on named types.
    pub fn from_parts(
        map: Arc<dyn MapFunction>,
        reduce: Option<ReduceDefinition>,
        stored_fields: BTreeSet<String>,
    ) -> Self {
        IndexDefinition {
            map,
            reduce,
            stored_fields,
            detached: false,
        }
    }

    /// Mark a field as returned by queries. Reduce outputs are always stored.
    pub fn store_field<S: Into<String>>(mut self, name: S) -> Self {
        self.stored_fields.insert(name.into());
        self
    }

    /// Placeholder for an index reopened from disk before its functions are
    /// bound again. Queries work; every document it is asked to map fails and
    /// reduce passes are refused, leaving stored aggregates untouched.
    pub fn detached(shape: IndexShape) -> Self {
        let definition = IndexDefinition {
            map: Arc::new(|document: &Document| -> Result<Vec<Value>> {
                Err(DivanError::mapping(format!(
                    "cannot map '{}': index definition is not loaded",
                    document.id
                )))
            }),
            reduce: None,
            stored_fields: shape.stored_fields,
            detached: true,
        };
        if shape.map_reduce {
            definition.with_reduce(
                |_: &Value| -> Option<Value> { None },
                |key: &str, _: &[Value]| -> Result<Vec<Value>> {
                    Err(DivanError::mapping(format!(
                        "cannot reduce '{key}': index definition is not loaded"
                    )))
                },
            )
        } else {
            definition
        }
    }

    /// Whether the functions are placeholders; see [`IndexDefinition::detached`].
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn is_map_reduce(&self) -> bool {
        self.reduce.is_some()
    }

    pub fn map_function(&self) -> &dyn MapFunction {
        self.map.as_ref()
    }

    pub fn reduce_definition(&self) -> Option<&ReduceDefinition> {
        self.reduce.as_ref()
    }

    pub fn stored_fields(&self) -> &BTreeSet<String> {
        &self.stored_fields
    }

    pub fn shape(&self) -> IndexShape {
        IndexShape {
            map_reduce: self.is_map_reduce(),
            stored_fields: self.stored_fields.clone(),
        }
    }
}

impl fmt::Debug for ReduceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReduceDefinition").finish_non_exhaustive()
    }
}

impl fmt::Debug for IndexDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDefinition")
            .field("map_reduce", &self.is_map_reduce())
            .field("stored_fields", &self.stored_fields)
            .field("detached", &self.detached)
            .finish()
    }
}
