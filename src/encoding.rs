//! Sortable textual encodings for index terms.
//!
//! The segment store compares range bounds lexicographically, so every value
//! that takes part in a range query must be written in a fixed-width form whose
//! string order equals its natural order:
//!
//! * datetimes: `yyyyMMddHHmmssfff` in UTC (17 decimal digits);
//! * non-negative integers up to `u32::MAX`: `0x` followed by 8 lowercase hex
//!   digits, stored under the `<field>_Range` companion field.

use chrono::{DateTime, Datelike, Utc};

/// Suffix of the companion field that carries the hex encoding of a number.
pub const RANGE_FIELD_SUFFIX: &str = "_Range";

/// Open end of a range query.
pub const NULL_SENTINEL: &str = "NULL";

/// Term written for a `null` field value. Distinct from [`NULL_SENTINEL`] so a
/// null never satisfies a range bound.
pub const NULL_VALUE: &str = "NULL_VALUE";

/// Encode a datetime as 17 sortable digits, e.g. `20100515000000000`.
///
/// Years outside `0..=9999` are clamped so the width never changes.
pub fn encode_datetime(dt: &DateTime<Utc>) -> String {
    if (0..=9999).contains(&dt.year()) {
        dt.format("%Y%m%d%H%M%S%3f").to_string()
    } else if dt.year() < 0 {
        "00000101000000000".to_string()
    } else {
        "99991231235959999".to_string()
    }
}

/// Encode an integer for range comparison, or `None` when it does not fit the
/// 8 hex digit form.
pub fn encode_range_number(value: i64) -> Option<String> {
    u32::try_from(value).ok().map(|v| format!("0x{v:08x}"))
}

/// Name of the range companion of `field`.
pub fn range_field_name(field: &str) -> String {
    format!("{field}{RANGE_FIELD_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_encode_datetime() {
        let day = Utc.with_ymd_and_hms(2010, 5, 15, 0, 0, 0).unwrap();
        assert_eq!(encode_datetime(&day), "20100515000000000");

        let precise = Utc
            .with_ymd_and_hms(2024, 12, 31, 23, 59, 58)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(7))
            .unwrap();
        let encoded = encode_datetime(&precise);
        assert_eq!(encoded, "20241231235958007");
        assert_eq!(encoded.len(), 17);
    }

    #[test]
    fn test_encode_range_number() {
        assert_eq!(encode_range_number(3).as_deref(), Some("0x00000003"));
        assert_eq!(encode_range_number(255).as_deref(), Some("0x000000ff"));
        assert_eq!(
            encode_range_number(i64::from(u32::MAX)).as_deref(),
            Some("0xffffffff")
        );
        assert_eq!(encode_range_number(-1), None);
        assert_eq!(encode_range_number(i64::from(u32::MAX) + 1), None);
    }

    #[test]
    fn test_encodings_sort_naturally() {
        let mut numbers: Vec<String> = [300_i64, 7, 4096, 0]
            .iter()
            .filter_map(|n| encode_range_number(*n))
            .collect();
        numbers.sort();
        assert_eq!(
            numbers,
            vec!["0x00000000", "0x00000007", "0x0000012c", "0x00001000"]
        );

        let earlier = Utc.with_ymd_and_hms(2009, 12, 31, 23, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        assert!(encode_datetime(&earlier) < encode_datetime(&later));
    }
}
