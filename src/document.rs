//! Document model: source documents and the tagged values they carry.

pub mod document;
pub mod value;

pub use document::{DOCUMENT_ID_FIELD, Document, DocumentBuilder};
pub use value::Value;
