//! Parser for the index query language.
//!
//! Segment stores evaluate the strings produced by the
//! [`compiler`](crate::query::compiler) (and typed by hand by users of the
//! admin CLI). Supported syntax:
//!
//! - Field terms: `Name:ayende`, `Title:"hello world"`
//! - Ranges: `Age_Range:[0x00000003 TO NULL]`, `{a TO b}`; `[`/`]` include the
//!   bound, `{`/`}` exclude it, `NULL` leaves that side open
//! - `AND` / `OR` (AND binds tighter; adjacent clauses are conjoined)
//! - Parentheses for grouping
//! - A leading projection `<Name, Age>: ` naming the fields to return
//! - The empty string, matching every entry

use std::iter::Peekable;
use std::ops::Bound;
use std::str::Chars;

use crate::encoding::NULL_SENTINEL;
use crate::error::{DivanError, Result};

/// A parsed query tree, evaluated against entry fields by segment stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedQuery {
    /// Matches everything.
    All,
    Term {
        field: String,
        value: String,
    },
    Range {
        field: String,
        lower: Bound<String>,
        upper: Bound<String>,
    },
    And(Vec<ParsedQuery>),
    Or(Vec<ParsedQuery>),
}

impl ParsedQuery {
    /// Evaluate the query against a lookup returning every value a field has.
    pub fn matches<'a, F>(&self, values_of: &F) -> bool
    where
        F: Fn(&str) -> Vec<&'a str>,
    {
        match self {
            ParsedQuery::All => true,
            ParsedQuery::Term { field, value } => {
                values_of(field).iter().any(|candidate| *candidate == value)
            }
            ParsedQuery::Range {
                field,
                lower,
                upper,
            } => values_of(field)
                .iter()
                .any(|candidate| in_range(candidate, lower, upper)),
            ParsedQuery::And(clauses) => clauses.iter().all(|clause| clause.matches(values_of)),
            ParsedQuery::Or(clauses) => clauses.iter().any(|clause| clause.matches(values_of)),
        }
    }
}

fn in_range(candidate: &str, lower: &Bound<String>, upper: &Bound<String>) -> bool {
    let above = match lower {
        Bound::Included(bound) => candidate >= bound.as_str(),
        Bound::Excluded(bound) => candidate > bound.as_str(),
        Bound::Unbounded => true,
    };
    let below = match upper {
        Bound::Included(bound) => candidate <= bound.as_str(),
        Bound::Excluded(bound) => candidate < bound.as_str(),
        Bound::Unbounded => true,
    };
    above && below
}

/// Split a leading `<f1, f2>: ` projection from a query string.
///
/// Returns the projected field names (if any) and the remaining query text.
pub fn split_projection(query_str: &str) -> Result<(Option<Vec<String>>, &str)> {
    let trimmed = query_str.trim_start();
    let Some(rest) = trimmed.strip_prefix('<') else {
        return Ok((None, query_str));
    };

    let end = rest
        .find(">:")
        .ok_or_else(|| DivanError::query(format!("Unterminated projection in '{query_str}'")))?;
    let fields = rest[..end]
        .split(',')
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>();
    Ok((Some(fields), &rest[end + 2..]))
}

/// Parse a query string (without projection) into a [`ParsedQuery`].
pub fn parse(query_str: &str) -> Result<ParsedQuery> {
    let trimmed = query_str.trim();
    if trimmed.is_empty() {
        return Ok(ParsedQuery::All);
    }

    let mut parser = QueryStringParser::new(trimmed);
    let query = parser.parse_or_expression()?;
    parser.skip_whitespace();
    match parser.chars.peek() {
        None => Ok(query),
        Some(c) => Err(DivanError::query(format!(
            "Unexpected '{c}' in query '{query_str}'"
        ))),
    }
}

/// Internal parser for parsing query strings.
struct QueryStringParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> QueryStringParser<'a> {
    fn new(query_str: &'a str) -> Self {
        QueryStringParser {
            chars: query_str.chars().peekable(),
        }
    }

    fn parse_or_expression(&mut self) -> Result<ParsedQuery> {
        let mut clauses = vec![self.parse_and_expression()?];

        while self.peek_word() == Some("OR") {
            self.consume_keyword("OR");
            clauses.push(self.parse_and_expression()?);
        }

        Ok(flatten(clauses, ParsedQuery::Or))
    }

    fn parse_and_expression(&mut self) -> Result<ParsedQuery> {
        let mut clauses = vec![self.parse_term()?];

        while self.peek_word() == Some("AND") || self.should_continue_and() {
            if self.peek_word() == Some("AND") {
                self.consume_keyword("AND");
            }
            clauses.push(self.parse_term()?);
        }

        Ok(flatten(clauses, ParsedQuery::And))
    }

    fn parse_term(&mut self) -> Result<ParsedQuery> {
        self.skip_whitespace();

        if self.chars.peek() == Some(&'(') {
            self.chars.next();
            let inner = self.parse_or_expression()?;
            self.skip_whitespace();
            if self.chars.next() != Some(')') {
                return Err(DivanError::query("Expected ')'"));
            }
            return Ok(inner);
        }

        let field = self.consume_field()?;
        match self.chars.peek() {
            Some('"') => Ok(ParsedQuery::Term {
                field,
                value: self.consume_phrase()?,
            }),
            Some('[') | Some('{') => self.parse_range(field),
            _ => Ok(ParsedQuery::Term {
                field,
                value: self.consume_word()?,
            }),
        }
    }

    fn parse_range(&mut self, field: String) -> Result<ParsedQuery> {
        let lower_inclusive = self.chars.next() == Some('[');
        self.skip_whitespace();
        let lower = self.consume_bound_value()?;
        self.skip_whitespace();
        if self.peek_word() != Some("TO") {
            return Err(DivanError::query(format!(
                "Expected 'TO' in range on field '{field}'"
            )));
        }
        self.consume_keyword("TO");
        let upper = self.consume_bound_value()?;
        self.skip_whitespace();
        let upper_inclusive = match self.chars.next() {
            Some(']') => true,
            Some('}') => false,
            _ => {
                return Err(DivanError::query(format!(
                    "Unterminated range on field '{field}'"
                )));
            }
        };

        Ok(ParsedQuery::Range {
            field,
            lower: to_bound(lower, lower_inclusive),
            upper: to_bound(upper, upper_inclusive),
        })
    }

    fn consume_field(&mut self) -> Result<String> {
        let mut field = String::new();
        while let Some(&ch) = self.chars.peek() {
            if ch == ':' {
                self.chars.next();
                return if field.is_empty() {
                    Err(DivanError::query("Empty field name"))
                } else {
                    Ok(field)
                };
            }
            if ch.is_whitespace() || ch == '(' || ch == ')' {
                break;
            }
            field.push(ch);
            self.chars.next();
        }
        Err(DivanError::query(format!(
            "Expected 'field:value' but found '{field}'"
        )))
    }

    fn consume_phrase(&mut self) -> Result<String> {
        // Consume opening quote
        self.chars.next();

        let mut phrase = String::new();
        while let Some(ch) = self.chars.next() {
            match ch {
                '"' => return Ok(phrase),
                '\\' => match self.chars.next() {
                    Some(escaped) => phrase.push(escaped),
                    None => break,
                },
                _ => phrase.push(ch),
            }
        }
        Err(DivanError::query("Unterminated phrase"))
    }

    fn consume_word(&mut self) -> Result<String> {
        let mut word = String::new();

        while let Some(&ch) = self.chars.peek() {
            if ch.is_whitespace() || ch == ')' {
                break;
            }
            word.push(ch);
            self.chars.next();
        }

        if word.is_empty() {
            Err(DivanError::query("Expected value but found end of input"))
        } else {
            Ok(word)
        }
    }

    fn consume_bound_value(&mut self) -> Result<String> {
        let mut word = String::new();
        while let Some(&ch) = self.chars.peek() {
            if ch.is_whitespace() || ch == ']' || ch == '}' {
                break;
            }
            word.push(ch);
            self.chars.next();
        }
        if word.is_empty() {
            Err(DivanError::query("Expected range bound"))
        } else {
            Ok(word)
        }
    }

    fn consume_keyword(&mut self, expected: &str) {
        for _ in 0..expected.len() {
            self.chars.next();
        }
        self.skip_whitespace();
    }

    fn peek_word(&mut self) -> Option<&'static str> {
        self.skip_whitespace();

        let remaining: String = self.chars.clone().take(4).collect();
        for keyword in ["AND", "OR", "TO"] {
            if let Some(rest) = remaining.strip_prefix(keyword)
                && rest.chars().next().is_none_or(char::is_whitespace)
            {
                return Some(keyword);
            }
        }
        None
    }

    fn should_continue_and(&mut self) -> bool {
        self.skip_whitespace();

        match self.chars.peek() {
            Some(ch) => *ch != ')' && self.peek_word().is_none(),
            None => false,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }
}

fn to_bound(value: String, inclusive: bool) -> Bound<String> {
    if value == NULL_SENTINEL {
        Bound::Unbounded
    } else if inclusive {
        Bound::Included(value)
    } else {
        Bound::Excluded(value)
    }
}

fn flatten(mut clauses: Vec<ParsedQuery>, wrap: fn(Vec<ParsedQuery>) -> ParsedQuery) -> ParsedQuery {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        wrap(clauses)
    }
}
