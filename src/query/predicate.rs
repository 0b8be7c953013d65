//! Typed predicate trees.
//!
//! Callers describe a query with Rust values instead of strings; the
//! [`compiler`](crate::query::compiler) turns the tree into the index query
//! language.
//!
//! ```
//! use divan::query::predicate::{Query, field};
//!
//! let query = Query::new()
//!     .filter(field("Name").eq("ayende") & field("Email").eq("ayende@ayende.com"));
//! assert_eq!(query.compile().unwrap(), "Name:ayende AND Email:ayende@ayende.com ");
//! ```

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::query::compiler::QueryCompiler;

/// A literal a field is compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    DateTime(DateTime<Utc>),
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::String(s)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Integer(i)
    }
}

impl From<i32> for Literal {
    fn from(i: i32) -> Self {
        Literal::Integer(i64::from(i))
    }
}

impl From<u32> for Literal {
    fn from(i: u32) -> Self {
        Literal::Integer(i64::from(i))
    }
}

impl From<f64> for Literal {
    fn from(f: f64) -> Self {
        Literal::Float(f)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(dt: DateTime<Utc>) -> Self {
        Literal::DateTime(dt)
    }
}

/// Comparison operator of a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

/// Member access path, e.g. `Name` or `Address.City`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn new<S: Into<String>>(name: S) -> Self {
        FieldPath {
            segments: vec![name.into()],
        }
    }

    /// Append a nested member.
    pub fn member<S: Into<String>>(mut self, name: S) -> Self {
        self.segments.push(name.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The field name when the path is a single member.
    pub fn as_simple(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [name] => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// A predicate tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: FieldPath,
        op: Operator,
        value: Literal,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare<L: Into<Literal>>(field: FieldPath, op: Operator, value: L) -> Self {
        Predicate::Compare {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        self.and(rhs)
    }
}

impl BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Predicate) -> Predicate {
        self.or(rhs)
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

/// Start a comparison on a field.
pub fn field<S: Into<String>>(name: S) -> FieldRef {
    FieldRef {
        path: FieldPath::new(name),
    }
}

/// A field reference waiting for its comparison.
#[derive(Debug, Clone)]
pub struct FieldRef {
    path: FieldPath,
}

impl FieldRef {
    /// Access a nested member of this field.
    pub fn member<S: Into<String>>(self, name: S) -> Self {
        FieldRef {
            path: self.path.member(name),
        }
    }

    pub fn eq<L: Into<Literal>>(self, value: L) -> Predicate {
        Predicate::compare(self.path, Operator::Eq, value)
    }

    pub fn ne<L: Into<Literal>>(self, value: L) -> Predicate {
        Predicate::compare(self.path, Operator::NotEq, value)
    }

    pub fn lt<L: Into<Literal>>(self, value: L) -> Predicate {
        Predicate::compare(self.path, Operator::Lt, value)
    }

    pub fn le<L: Into<Literal>>(self, value: L) -> Predicate {
        Predicate::compare(self.path, Operator::Le, value)
    }

    pub fn gt<L: Into<Literal>>(self, value: L) -> Predicate {
        Predicate::compare(self.path, Operator::Gt, value)
    }

    pub fn ge<L: Into<Literal>>(self, value: L) -> Predicate {
        Predicate::compare(self.path, Operator::Ge, value)
    }
}

/// A query over an index: an optional predicate and an optional projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    predicate: Option<Predicate>,
    projection: Option<Vec<String>>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter. Successive filters are combined with a conjunction.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Project the results onto the given fields, in order.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn projection(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    /// Compile into the index query language.
    pub fn compile(&self) -> Result<String> {
        QueryCompiler::compile(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_produces_tree() {
        let predicate = field("Name").eq("ayende") | field("Age").gt(3);
        match predicate {
            Predicate::Or(left, right) => {
                assert_eq!(
                    *left,
                    Predicate::Compare {
                        field: FieldPath::new("Name"),
                        op: Operator::Eq,
                        value: Literal::String("ayende".to_string()),
                    }
                );
                assert!(matches!(*right, Predicate::Compare { op: Operator::Gt, .. }));
            }
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn test_successive_filters_are_conjoined() {
        let query = Query::new()
            .filter(field("Name").eq("ayende"))
            .filter(field("Age").eq(3));
        assert!(matches!(query.predicate(), Some(Predicate::And(_, _))));
        assert!(query.projection().is_none());
    }

    #[test]
    fn test_field_path() {
        let path = FieldPath::new("Address").member("City");
        assert_eq!(path.to_string(), "Address.City");
        assert_eq!(path.as_simple(), None);
        assert_eq!(FieldPath::new("Name").as_simple(), Some("Name"));
    }
}
