//! Compiles typed predicate trees into the index query language.
//!
//! The output is consumed verbatim by segment stores and by older clients that
//! compare query strings textually, so the layout is fixed: every top-level
//! clause ends with a single space, joiners are `AND `/`OR ` appended to the
//! left operand, and range bounds use the sortable encodings from
//! [`crate::encoding`].
//!
//! | Predicate | Output |
//! |---|---|
//! | `Name == "ayende"` | `Name:ayende ` |
//! | `Age > 3` | `Age_Range:[0x00000003 TO NULL] ` |
//! | `Birthday <= 2010-05-15` | `Birthday:{NULL TO 20100515000000000} ` |
//!
//! A shape that cannot be expressed faithfully fails with
//! [`DivanError::Compilation`] instead of being approximated.

use crate::encoding::{NULL_SENTINEL, encode_datetime, encode_range_number, range_field_name};
use crate::error::{DivanError, Result};
use crate::query::predicate::{FieldPath, Literal, Operator, Predicate, Query};

/// Stateless predicate-to-string compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler;

impl QueryCompiler {
    /// Compile a query. A query without a predicate compiles to the empty
    /// string, whatever its projection.
    pub fn compile(query: &Query) -> Result<String> {
        let Some(predicate) = query.predicate() else {
            return Ok(String::new());
        };

        let body = Self::compile_predicate(predicate)?;
        match query.projection() {
            Some(fields) if !fields.is_empty() => Ok(format!("<{}>: {body}", fields.join(", "))),
            _ => Ok(body),
        }
    }

    /// Compile a bare predicate tree.
    pub fn compile_predicate(predicate: &Predicate) -> Result<String> {
        match predicate {
            Predicate::Compare { field, op, value } => Self::compile_comparison(field, *op, value),
            Predicate::And(left, right) => Ok(format!(
                "{}AND {}",
                Self::compile_operand(left, Junction::And)?,
                Self::compile_operand(right, Junction::And)?
            )),
            Predicate::Or(left, right) => Ok(format!(
                "{}OR {}",
                Self::compile_operand(left, Junction::Or)?,
                Self::compile_operand(right, Junction::Or)?
            )),
            Predicate::Not(_) => Err(DivanError::compilation(
                "negation (!) is not supported by the index query language",
            )),
        }
    }

    /// Compile one side of a junction, grouping it when it is a junction of
    /// the other kind.
    fn compile_operand(predicate: &Predicate, parent: Junction) -> Result<String> {
        let compiled = Self::compile_predicate(predicate)?;
        let needs_group = matches!(
            (parent, predicate),
            (Junction::And, Predicate::Or(..)) | (Junction::Or, Predicate::And(..))
        );
        if needs_group {
            Ok(format!("({}) ", compiled.trim_end()))
        } else {
            Ok(compiled)
        }
    }

    fn compile_comparison(path: &FieldPath, op: Operator, value: &Literal) -> Result<String> {
        let field = path.as_simple().ok_or_else(|| {
            DivanError::compilation(format!(
                "member access '{path}' is not supported, only simple fields can be queried"
            ))
        })?;

        match op {
            Operator::Eq => Ok(format!("{field}:{} ", Self::equality_term(value))),
            Operator::NotEq => Err(DivanError::compilation(format!(
                "operator != on field '{field}' is not supported"
            ))),
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => match value {
                Literal::DateTime(dt) => Ok(Self::range(field, op, &encode_datetime(dt))),
                Literal::Integer(i) => {
                    let encoded = encode_range_number(*i).ok_or_else(|| {
                        DivanError::compilation(format!(
                            "range on field '{field}' needs an integer between 0 and {}, got {i}",
                            u32::MAX
                        ))
                    })?;
                    Ok(Self::range(&range_field_name(field), op, &encoded))
                }
                Literal::Float(f) => Err(DivanError::compilation(format!(
                    "range operator {} on floating point value {f} for field '{field}' is not supported",
                    op.symbol()
                ))),
                Literal::String(_) => Err(DivanError::compilation(format!(
                    "range operator {} on string field '{field}' is not supported",
                    op.symbol()
                ))),
            },
        }
    }

    fn equality_term(value: &Literal) -> String {
        match value {
            Literal::String(s) => quote_if_needed(s),
            Literal::Integer(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::DateTime(dt) => encode_datetime(dt),
        }
    }

    // Brackets and braces follow the established wire layout:
    // `<` -> [NULL TO v], `<=` -> {NULL TO v}, `>` -> [v TO NULL], `>=` -> {v TO NULL}.
    fn range(field: &str, op: Operator, literal: &str) -> String {
        match op {
            Operator::Lt => format!("{field}:[{NULL_SENTINEL} TO {literal}] "),
            Operator::Le => format!("{field}:{{{NULL_SENTINEL} TO {literal}}} "),
            Operator::Gt => format!("{field}:[{literal} TO {NULL_SENTINEL}] "),
            _ => format!("{field}:{{{literal} TO {NULL_SENTINEL}}} "),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Junction {
    And,
    Or,
}

/// Emit a string term verbatim unless it would break clause boundaries or
/// open a range, in which case it becomes a quoted phrase.
fn quote_if_needed(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.starts_with(['[', '{', '<'])
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '(' | ')'));
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Convenience wrapper around [`QueryCompiler::compile`].
pub fn compile(query: &Query) -> Result<String> {
    QueryCompiler::compile(query)
}
