//! Error types for the Divan indexing core.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`DivanError`] enum. Read-path and structural failures are reported through
//! it; per-document failures on the write path are not errors at all but are
//! collected into an [`IndexingReport`](crate::index::IndexingReport).
//!
//! # Examples
//!
//! ```
//! use divan::error::{DivanError, Result};
//!
//! fn lookup(name: &str) -> Result<()> {
//!     Err(DivanError::not_found(format!("index {name}")))
//! }
//!
//! let err = lookup("Users/ByName").unwrap_err();
//! assert!(err.is_not_found());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Divan operations.
#[derive(Error, Debug)]
pub enum DivanError {
    /// I/O errors (directory creation, segment files, ...)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A named resource (usually an index) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A named resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A predicate tree could not be compiled into a query string.
    #[error("Compilation error: {0}")]
    Compilation(String),

    /// Optimistic concurrency conflict (etag mismatch).
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    /// Failure while mapping or reducing a single item.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// The index exists but cannot serve the request yet (detached).
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Query string errors (parsing, invalid ranges, ...)
    #[error("Query error: {0}")]
    Query(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with DivanError.
pub type Result<T> = std::result::Result<T, DivanError>;

impl DivanError {
    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        DivanError::NotFound(msg.into())
    }

    /// Create a new already exists error.
    pub fn already_exists<S: Into<String>>(msg: S) -> Self {
        DivanError::AlreadyExists(msg.into())
    }

    /// Create a new compilation error.
    pub fn compilation<S: Into<String>>(msg: S) -> Self {
        DivanError::Compilation(msg.into())
    }

    /// Create a new concurrency error.
    pub fn concurrency<S: Into<String>>(msg: S) -> Self {
        DivanError::Concurrency(msg.into())
    }

    /// Create a new mapping error.
    pub fn mapping<S: Into<String>>(msg: S) -> Self {
        DivanError::Mapping(msg.into())
    }

    /// Create a new unavailable error.
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        DivanError::Unavailable(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        DivanError::Query(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        DivanError::Storage(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        DivanError::InvalidArgument(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DivanError::Other(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DivanError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, DivanError::AlreadyExists(_))
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, DivanError::Concurrency(_))
    }

    pub fn is_compilation(&self) -> bool {
        matches!(self, DivanError::Compilation(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, DivanError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = DivanError::not_found("index Users");
        assert_eq!(error.to_string(), "Not found: index Users");
        assert!(error.is_not_found());

        let error = DivanError::already_exists("index Users");
        assert_eq!(error.to_string(), "Already exists: index Users");
        assert!(error.is_already_exists());

        let error = DivanError::compilation("operator != is not supported");
        assert_eq!(
            error.to_string(),
            "Compilation error: operator != is not supported"
        );
        assert!(error.is_compilation());
        assert!(!error.is_not_found());

        let error = DivanError::unavailable("index Orders is detached");
        assert!(error.is_unavailable());
        assert!(!error.is_compilation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let divan_error = DivanError::from(io_error);

        match divan_error {
            DivanError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }
}
