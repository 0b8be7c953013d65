//! Conversion of contributions and reduce outputs into segment-store entries.

use std::collections::BTreeSet;

use crate::document::{DOCUMENT_ID_FIELD, Value};
use crate::encoding::{NULL_VALUE, encode_datetime, encode_range_number, range_field_name};
use crate::error::{DivanError, Result};
use crate::index::REDUCE_KEY_FIELD;
use crate::segment::IndexEntry;

/// Turns object values into [`IndexEntry`]s.
///
/// Integers get a `<field>_Range` companion carrying the hex encoding when
/// they fit it, so range queries and equality queries hit distinct fields.
/// Companion fields are never stored.
#[derive(Debug, Clone, Default)]
pub struct EntryConverter {
    stored_fields: BTreeSet<String>,
    store_all: bool,
}

impl EntryConverter {
    /// Store only the named fields.
    pub fn new(stored_fields: BTreeSet<String>) -> Self {
        EntryConverter {
            stored_fields,
            store_all: false,
        }
    }

    /// Store every field; used for reduce outputs.
    pub fn storing_all() -> Self {
        EntryConverter {
            stored_fields: BTreeSet::new(),
            store_all: true,
        }
    }

    /// Convert one object value. Reserved fields of the input are ignored; the
    /// caller tags the entry itself.
    pub fn convert(&self, value: &Value) -> Result<IndexEntry> {
        let Some(fields) = value.as_object() else {
            return Err(DivanError::mapping(format!(
                "expected an object, got {}",
                value.type_name()
            )));
        };

        let mut entry = IndexEntry::new();
        for (name, field_value) in fields {
            if name == DOCUMENT_ID_FIELD || name == REDUCE_KEY_FIELD {
                continue;
            }
            let stored = self.store_all || self.stored_fields.contains(name);
            match field_value {
                Value::List(items) => {
                    for item in items {
                        add_value(&mut entry, name, item, stored);
                    }
                }
                other => add_value(&mut entry, name, other, stored),
            }
        }
        Ok(entry)
    }
}

fn add_value(entry: &mut IndexEntry, name: &str, value: &Value, stored: bool) {
    match value {
        Value::Null => entry.add_field(name, NULL_VALUE, stored),
        Value::Bool(b) => entry.add_field(name, b.to_string(), stored),
        Value::Integer(i) => {
            entry.add_field(name, i.to_string(), stored);
            if let Some(encoded) = encode_range_number(*i) {
                entry.add_field(range_field_name(name), encoded, false);
            }
        }
        Value::Float(f) => entry.add_field(name, f.to_string(), stored),
        Value::String(s) => entry.add_field(name, s.as_str(), stored),
        Value::DateTime(dt) => entry.add_field(name, encode_datetime(dt), stored),
        Value::List(_) | Value::Object(_) => {
            entry.add_field(name, value.to_canonical_json(), stored)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_convert_scalars() {
        let converter = EntryConverter::new(BTreeSet::from(["Name".to_string()]));
        let value = Value::object([
            ("Name", Value::from("ayende")),
            ("Age", Value::from(3)),
            ("Score", Value::from(1.5)),
            ("Active", Value::from(true)),
            ("Nick", Value::Null),
            (
                "Birthday",
                Value::from(Utc.with_ymd_and_hms(2010, 5, 15, 0, 0, 0).unwrap()),
            ),
        ]);

        let entry = converter.convert(&value).unwrap();
        assert_eq!(entry.first("Name"), Some("ayende"));
        assert_eq!(entry.first("Age"), Some("3"));
        assert_eq!(entry.first("Age_Range"), Some("0x00000003"));
        assert_eq!(entry.first("Score"), Some("1.5"));
        assert_eq!(entry.first("Active"), Some("true"));
        assert_eq!(entry.first("Nick"), Some("NULL_VALUE"));
        assert_eq!(entry.first("Birthday"), Some("20100515000000000"));

        let stored: Vec<&str> = entry.stored_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(stored, vec!["Name"]);
    }

    #[test]
    fn test_negative_integers_have_no_range_field() {
        let entry = EntryConverter::storing_all()
            .convert(&Value::object([("Delta", Value::from(-4))]))
            .unwrap();
        assert_eq!(entry.first("Delta"), Some("-4"));
        assert_eq!(entry.first("Delta_Range"), None);
    }

    #[test]
    fn test_lists_and_objects() {
        let value = Value::object([
            ("Tags", Value::List(vec![Value::from("a"), Value::from("b")])),
            (
                "Address",
                Value::object([("City", Value::from("Hadera")), ("Zip", Value::from(1))]),
            ),
        ]);
        let entry = EntryConverter::storing_all().convert(&value).unwrap();
        assert_eq!(entry.values("Tags"), vec!["a", "b"]);
        assert_eq!(entry.first("Address"), Some(r#"{"City":"Hadera","Zip":1}"#));
        assert!(entry.fields.iter().all(|f| f.stored));
    }

    #[test]
    fn test_reserved_fields_are_skipped() {
        let value = Value::object([
            (DOCUMENT_ID_FIELD, Value::from("users/1")),
            (REDUCE_KEY_FIELD, Value::from("k")),
            ("Name", Value::from("ayende")),
        ]);
        let entry = EntryConverter::storing_all().convert(&value).unwrap();
        assert_eq!(entry.fields.len(), 1);
    }

    #[test]
    fn test_non_object_fails() {
        let err = EntryConverter::default()
            .convert(&Value::from("plain"))
            .unwrap_err();
        assert!(err.to_string().contains("expected an object, got string"));
    }
}
