//! Query surface: typed predicates, the compiler that renders them as query
//! strings, and the parser segment stores use to evaluate those strings.

pub mod compiler;
pub mod parser;
pub mod predicate;

pub use compiler::QueryCompiler;
pub use parser::{ParsedQuery, parse, split_projection};
pub use predicate::{FieldPath, Literal, Operator, Predicate, Query, field};
