//! Value model: a closed algebraic representation of record data
//!
//! Every document, query operand, and expression result is a [`Value`].
//! "Undefined" (a missing field, an unbound variable) is represented as
//! `Option<Value>::None` at resolution boundaries and is never stored inside
//! a `Value`; writing an undefined result into a record omits the field.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// A record value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null (distinct from an absent field)
    Null,
    /// Boolean
    Bool(bool),
    /// Number (single numeric type, like the query language it models)
    Number(f64),
    /// UTF-8 string
    String(String),
    /// Instant in time, compared by timestamp
    Date(DateTime<Utc>),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// Mapping from field name to value
    Object(BTreeMap<String, Value>),
}

/// Semantic kind of a value, as reported by the classifier.
///
/// `Undefined` is the kind of an absent value (`None`); it never describes a
/// stored `Value`. The `$type` operator also accepts kind names with no Rust
/// inhabitants (`"function"`, `"symbol"`) — those simply never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Explicit null
    Null,
    /// Absent value
    Undefined,
    /// Sequence (never reported as `Object`)
    Array,
    /// Date (never reported as `Object`)
    Date,
    /// Mapping
    Object,
    /// Number
    Number,
    /// String
    String,
    /// Boolean
    Boolean,
}

impl ValueKind {
    /// Name used by the `$type` operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Undefined => "undefined",
            ValueKind::Array => "array",
            ValueKind::Date => "date",
            ValueKind::Object => "object",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a possibly-absent value into exactly one [`ValueKind`].
///
/// Total function, no side effects. `None` classifies as `Undefined`; arrays
/// and dates are never classified as `Object`.
pub fn kind_of(value: Option<&Value>) -> ValueKind {
    match value {
        None => ValueKind::Undefined,
        Some(Value::Null) => ValueKind::Null,
        Some(Value::Bool(_)) => ValueKind::Boolean,
        Some(Value::Number(_)) => ValueKind::Number,
        Some(Value::String(_)) => ValueKind::String,
        Some(Value::Date(_)) => ValueKind::Date,
        Some(Value::Array(_)) => ValueKind::Array,
        Some(Value::Object(_)) => ValueKind::Object,
    }
}

impl Value {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        kind_of(Some(self))
    }

    /// Borrow as an array, if this is one.
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Borrow as an object, if this is one.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow as a string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// True when this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// An empty record.
    pub fn empty_object() -> Value {
        Value::Object(BTreeMap::new())
    }
}

/// Truthiness of a possibly-absent value.
///
/// Undefined, null, `false`, `0`, NaN, and the empty string are falsy;
/// everything else (including empty arrays and empty objects) is truthy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => *n != 0.0 && !n.is_nan(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Date(_)) | Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Numeric coercion of a possibly-absent value.
///
/// `None` means "not a number": undefined input, an unparseable string, or a
/// compound value. Null coerces to 0, booleans to 0/1, dates to their epoch
/// milliseconds, strings to their parsed numeric value (empty/whitespace
/// strings to 0).
pub fn coerce_number(value: Option<&Value>) -> Option<f64> {
    match value {
        None => None,
        Some(Value::Null) => Some(0.0),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(Value::Number(n)) => {
            if n.is_nan() {
                None
            } else {
                Some(*n)
            }
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        Some(Value::Date(d)) => Some(d.timestamp_millis() as f64),
        Some(Value::Array(_)) | Some(Value::Object(_)) => None,
    }
}

/// Format a number without a trailing `.0` for integral values.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Display form of a value (string coercion).
///
/// Nulls render as `"null"`, numbers without spurious fraction digits, dates
/// as RFC 3339, arrays as comma-joined elements (nulls as empty), objects as
/// canonical JSON.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.clone(),
        Value::Date(d) => d.to_rfc3339(),
        Value::Array(arr) => arr
            .iter()
            .map(|v| match v {
                Value::Null => String::new(),
                other => to_display_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => serde_json::Value::from(value.clone()).to_string(),
    }
}

/// Display form of a possibly-absent value (`"undefined"` when absent).
pub(crate) fn display_or_undefined(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(v) => to_display_string(v),
    }
}

/// Stable string key for a possibly-absent value.
///
/// Object-shaped values use their canonical JSON serialization (field order
/// is deterministic); everything else uses its display form. Used as the
/// grouping key by `$group` and as the lookup key of [`crate::EqualityIndex`].
pub fn key_string(value: Option<&Value>) -> String {
    match value {
        Some(v @ Value::Object(_)) => serde_json::Value::from(v.clone()).to_string(),
        other => display_or_undefined(other),
    }
}

/// Loose relational comparison.
///
/// Two strings compare lexicographically; otherwise both sides coerce to
/// numbers, and the comparison is undecided (`None`) when either side fails
/// to coerce. Dates therefore compare by timestamp. Used by `$sort`, the
/// `$min`/`$max` accumulators, and relational expression operators.
pub fn loose_compare(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
    if let (Some(Value::String(sa)), Some(Value::String(sb))) = (a, b) {
        return Some(sa.cmp(sb));
    }
    let na = coerce_number(a)?;
    let nb = coerce_number(b)?;
    na.partial_cmp(&nb)
}

/// Parse a possibly-absent value as a UTC instant.
///
/// Dates pass through; numbers are epoch milliseconds; strings accept
/// RFC 3339 / ISO-8601 date-times and bare `YYYY-MM-DD` dates (midnight UTC).
/// Anything else is an invalid date (`None`).
pub fn parse_date(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value {
        Some(Value::Date(d)) => Some(*d),
        Some(Value::Number(n)) => {
            if n.is_finite() {
                Utc.timestamp_millis_opt(*n as i64).single()
            } else {
                None
            }
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
            {
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
            {
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
            }
            None
        }
        _ => None,
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            // Dates serialize as RFC 3339 strings (lossy round trip)
            Value::Date(d) => serde_json::Value::String(d.to_rfc3339()),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Date(d) => serializer.serialize_str(&d.to_rfc3339()),
            Value::Array(arr) => {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for v in arr {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Value::from(serde_json::Value::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_classifier_tags() {
        assert_eq!(kind_of(None), ValueKind::Undefined);
        assert_eq!(kind_of(Some(&Value::Null)), ValueKind::Null);
        assert_eq!(kind_of(Some(&v(json!([1, 2])))), ValueKind::Array);
        assert_eq!(kind_of(Some(&v(json!({"a": 1})))), ValueKind::Object);
        assert_eq!(kind_of(Some(&v(json!(3.5)))), ValueKind::Number);
        assert_eq!(kind_of(Some(&v(json!("x")))), ValueKind::String);
        assert_eq!(kind_of(Some(&v(json!(true)))), ValueKind::Boolean);
        assert_eq!(kind_of(Some(&Value::Date(Utc::now()))), ValueKind::Date);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&Value::Null)));
        assert!(!is_truthy(Some(&v(json!(0)))));
        assert!(!is_truthy(Some(&v(json!("")))));
        assert!(!is_truthy(Some(&v(json!(false)))));
        assert!(is_truthy(Some(&v(json!([])))));
        assert!(is_truthy(Some(&v(json!({})))));
        assert!(is_truthy(Some(&v(json!("x")))));
        assert!(is_truthy(Some(&v(json!(-1)))));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(coerce_number(Some(&Value::Null)), Some(0.0));
        assert_eq!(coerce_number(Some(&v(json!(true)))), Some(1.0));
        assert_eq!(coerce_number(Some(&v(json!("42.5")))), Some(42.5));
        assert_eq!(coerce_number(Some(&v(json!("  ")))), Some(0.0));
        assert_eq!(coerce_number(Some(&v(json!("abc")))), None);
        assert_eq!(coerce_number(None), None);
        assert_eq!(coerce_number(Some(&v(json!([1])))), None);
    }

    #[test]
    fn test_display_form() {
        assert_eq!(to_display_string(&v(json!(2.0))), "2");
        assert_eq!(to_display_string(&v(json!(2.5))), "2.5");
        assert_eq!(to_display_string(&v(json!([1, null, "a"]))), "1,,a");
        assert_eq!(to_display_string(&Value::Null), "null");
    }

    #[test]
    fn test_key_string_canonical_for_objects() {
        let a = v(json!({"city": "NY", "year": 2020}));
        let b = v(json!({"year": 2020, "city": "NY"}));
        assert_eq!(key_string(Some(&a)), key_string(Some(&b)));
        assert_eq!(key_string(None), "undefined");
        assert_eq!(key_string(Some(&v(json!("NY")))), "NY");
    }

    #[test]
    fn test_loose_compare() {
        let five = v(json!("5"));
        let three = v(json!(3));
        // string vs number coerces numerically
        assert_eq!(
            loose_compare(Some(&five), Some(&three)),
            Some(Ordering::Greater)
        );
        // both strings compare lexicographically
        assert_eq!(
            loose_compare(Some(&v(json!("10"))), Some(&v(json!("9")))),
            Some(Ordering::Less)
        );
        assert_eq!(loose_compare(Some(&v(json!("abc"))), Some(&three)), None);
    }

    #[test]
    fn test_parse_date_forms() {
        let d = parse_date(Some(&v(json!("2021-03-04T05:06:07Z")))).unwrap();
        assert_eq!(d.timestamp(), 1614834367);
        assert!(parse_date(Some(&v(json!("2021-03-04")))).is_some());
        assert!(parse_date(Some(&v(json!("not a date")))).is_none());
        assert!(parse_date(None).is_none());
        let ms = parse_date(Some(&v(json!(1614834367000i64)))).unwrap();
        assert_eq!(ms.timestamp(), 1614834367);
    }

    #[test]
    fn test_json_round_trip() {
        let original = json!({ "a": 1, "b": [true, null, "x"], "c": { "d": 2.5 } });
        let converted: serde_json::Value = Value::from(original.clone()).into();
        assert_eq!(converted, original);
    }
}
