//! Source documents handed to the indexing pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::value::Value;

/// Name of the field that tags entries written by a simple index with the id
/// of their source document.
pub const DOCUMENT_ID_FIELD: &str = "__document_id";

/// A document as supplied by the document store or change feed.
///
/// The core only borrows documents for the duration of an indexing pass.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Document {
    /// Unique key, e.g. `users/1`.
    pub id: String,
    /// Version token used by collaborators for optimistic concurrency.
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub body: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Document {
    /// Create a new empty document with the given id.
    pub fn new<S: Into<String>>(id: S) -> Self {
        Document {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Create a builder for constructing documents.
    pub fn builder<S: Into<String>>(id: S) -> DocumentBuilder {
        DocumentBuilder::new(id)
    }

    /// Get a body field.
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// Get a metadata field.
    pub fn get_metadata(&self, name: &str) -> Option<&Value> {
        self.metadata.get(name)
    }
}

/// A builder for constructing documents in a fluent manner.
#[derive(Debug)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    pub fn new<S: Into<String>>(id: S) -> Self {
        DocumentBuilder {
            document: Document::new(id),
        }
    }

    /// Set the version token.
    pub fn etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.document.etag = Some(etag.into());
        self
    }

    /// Add a body field.
    pub fn field<S: Into<String>, V: Into<Value>>(mut self, name: S, value: V) -> Self {
        self.document.body.insert(name.into(), value.into());
        self
    }

    /// Add a metadata entry.
    pub fn metadata<S: Into<String>, V: Into<Value>>(mut self, name: S, value: V) -> Self {
        self.document.metadata.insert(name.into(), value.into());
        self
    }

    /// Build the final document.
    pub fn build(self) -> Document {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_fields() {
        let doc = Document::builder("users/1")
            .etag("00000000-0000-0000-0000-000000000001")
            .field("Name", "ayende")
            .field("Email", "ayende@ayende.com")
            .field("Age", 3)
            .metadata("Raven-Entity-Name", "Users")
            .build();

        let names: Vec<&str> = doc.body.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Age", "Email", "Name"]);
        assert_eq!(doc.get_field("Age"), Some(&Value::Integer(3)));
        assert_eq!(
            doc.get_metadata("Raven-Entity-Name").and_then(Value::as_str),
            Some("Users")
        );
    }
}
