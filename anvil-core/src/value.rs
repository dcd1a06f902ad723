// src/value.rs
// Dynamically-typed value model for documents flowing through the pipeline

use crate::document::Document;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as Json;
use std::cmp::Ordering;

/// A BSON-like value: the tagged union every operator dispatches over.
///
/// `Missing` is distinct from `Null`: it represents the absence of a field
/// (a dotted path that didn't resolve, a projected expression with no
/// result). Inserting `Missing` into a document omits the field entirely.
#[derive(Debug, Clone)]
pub enum Value {
    Missing,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Document(Document),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or missing: the values `$ifNull` branches on
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Missing | Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Human-readable type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Missing => "missing",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
        }
    }

    /// Canonical type rank used for cross-type comparison.
    ///
    /// Ordering table (BSON-style):
    /// missing < null < numbers < string < document < array < bool < date
    pub(crate) fn type_rank(&self) -> u8 {
        match self {
            Value::Missing => 0,
            Value::Null => 1,
            Value::Int(_) | Value::Double(_) => 2,
            Value::String(_) => 3,
            Value::Document(_) => 4,
            Value::Array(_) => 5,
            Value::Bool(_) => 6,
            Value::Date(_) => 7,
        }
    }

    /// Total order over values. Used by `$sort`, `$min`/`$max` and the
    /// comparison operators. Values of different types order by type rank;
    /// numbers compare by value regardless of int/double representation.
    pub fn compare(&self, other: &Value) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Missing, Value::Missing) => Ordering::Equal,
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                // Int/Double compare by numeric value. NaN holds a fixed
                // position before every other number so the order stays total.
                let fa = a.as_f64().unwrap_or(f64::NAN);
                let fb = b.as_f64().unwrap_or(f64::NAN);
                match (fa.is_nan(), fb.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => fa.partial_cmp(&fb).unwrap_or(Ordering::Equal),
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.compare(y);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Document(a), Value::Document(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let c = ka.cmp(kb);
                    if c != Ordering::Equal {
                        return c;
                    }
                    let c = va.compare(vb);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => unreachable!("values of equal type rank"),
        }
    }

    /// Boolean coercion: false, 0, 0.0, null and missing are falsy,
    /// everything else is truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Missing | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Double(d) => *d != 0.0,
            _ => true,
        }
    }

    /// String coercion used by `$concat`/`$toUpper`/`$substr`: numbers
    /// render in their natural decimal form, strings pass through.
    /// Returns None for non-coercible types.
    pub fn coerce_to_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(n) => Some(n.to_string()),
            Value::Double(d) => Some(d.to_string()),
            _ => None,
        }
    }

    /// Convert from parsed JSON. Whole numbers that fit in i64 become
    /// `Int`, other numbers `Double`. The extended-JSON form
    /// `{"$date": "<rfc3339>"}` becomes a `Date`.
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                if map.len() == 1 {
                    if let Some(Json::String(s)) = map.get("$date") {
                        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                            return Value::Date(dt.with_timezone(&Utc));
                        }
                    }
                }
                Value::Document(Document::from_json_object(map))
            }
        }
    }

    /// Convert to JSON for replies and export. Dates render as
    /// `{"$date": "<rfc3339>"}` so the conversion round-trips; `Missing`
    /// degrades to null (callers should omit missing fields instead of
    /// serializing them).
    pub fn to_json(&self) -> Json {
        match self {
            Value::Missing | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(dt) => {
                let mut map = serde_json::Map::new();
                map.insert(
                    "$date".to_string(),
                    Json::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
                );
                Json::Object(map)
            }
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Document(doc) => doc.to_json(),
        }
    }
}

// Serializes to the same shape as `to_json`, without building an
// intermediate tree.
impl serde::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            Value::Missing | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::String(s) => serializer.serialize_str(s),
            Value::Date(dt) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$date", &dt.to_rfc3339_opts(SecondsFormat::Secs, true))?;
                map.end()
            }
            Value::Array(items) => serializer.collect_seq(items),
            Value::Document(doc) => doc.serialize(serializer),
        }
    }
}

// Structural equality with numeric cross-type equality (1 == 1.0).
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::Date(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_numeric_cross_type_equality() {
        assert_eq!(Value::Int(1), Value::Double(1.0));
        assert_ne!(Value::Int(1), Value::Double(1.5));
        assert_ne!(Value::Int(1), Value::String("1".to_string()));
    }

    #[test]
    fn test_type_rank_ordering() {
        let dt = Utc.with_ymd_and_hms(2004, 3, 21, 18, 59, 54).unwrap();
        let ascending = vec![
            Value::Missing,
            Value::Null,
            Value::Int(999),
            Value::String("a".to_string()),
            Value::Document(Document::new()),
            Value::Array(vec![]),
            Value::Bool(false),
            Value::Date(dt),
        ];
        for pair in ascending.windows(2) {
            assert_eq!(
                pair[0].compare(&pair[1]),
                Ordering::Less,
                "{} should sort before {}",
                pair[0].type_name(),
                pair[1].type_name()
            );
        }
    }

    #[test]
    fn test_number_compare() {
        assert_eq!(Value::Int(3).compare(&Value::Double(3.5)), Ordering::Less);
        assert_eq!(Value::Double(7.0).compare(&Value::Int(7)), Ordering::Equal);
        assert_eq!(Value::Int(10).compare(&Value::Int(2)), Ordering::Greater);
    }

    #[test]
    fn test_nan_holds_fixed_position_among_numbers() {
        let nan = Value::Double(f64::NAN);
        assert_eq!(nan.compare(&Value::Int(1)), Ordering::Less);
        assert_eq!(Value::Int(1).compare(&nan), Ordering::Greater);
        assert_eq!(nan.compare(&Value::Double(f64::NEG_INFINITY)), Ordering::Less);
        assert_eq!(nan.compare(&Value::Double(f64::NAN)), Ordering::Equal);
        // still inside the numeric bracket
        assert_eq!(nan.compare(&Value::Null), Ordering::Greater);
        assert_eq!(nan.compare(&Value::from("a")), Ordering::Less);
    }

    #[test]
    fn test_array_compare_elementwise() {
        let a = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::Array(vec![Value::Int(1), Value::Int(3)]);
        let c = Value::Array(vec![Value::Int(1)]);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(c.compare(&a), Ordering::Less); // shorter prefix sorts first
        assert_eq!(a.compare(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_document_equality_is_order_sensitive() {
        let mut d1 = Document::new();
        d1.insert("a", Value::Int(1));
        d1.insert("b", Value::Int(2));

        let mut d2 = Document::new();
        d2.insert("b", Value::Int(2));
        d2.insert("a", Value::Int(1));

        assert_ne!(Value::Document(d1.clone()), Value::Document(d2));
        assert_eq!(Value::Document(d1.clone()), Value::Document(d1));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Missing.truthy());
        assert!(!Value::Null.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Double(0.0).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(Value::String(String::new()).truthy()); // empty string is truthy
        assert!(Value::Array(vec![]).truthy());
    }

    #[test]
    fn test_coerce_to_string() {
        assert_eq!(Value::Int(17).coerce_to_string(), Some("17".to_string()));
        assert_eq!(Value::Double(2.5).coerce_to_string(), Some("2.5".to_string()));
        assert_eq!(Value::Double(5.0).coerce_to_string(), Some("5".to_string()));
        assert_eq!(
            Value::String("foo".to_string()).coerce_to_string(),
            Some("foo".to_string())
        );
        assert_eq!(Value::Bool(true).coerce_to_string(), None);
        assert_eq!(Value::Null.coerce_to_string(), None);
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from_json(&json!(5)), Value::Int(5));
        assert_eq!(Value::from_json(&json!(5.5)), Value::Double(5.5));
        assert_eq!(Value::from_json(&json!(null)), Value::Null);
    }

    #[test]
    fn test_date_extended_json_roundtrip() {
        let dt = Utc.with_ymd_and_hms(2004, 3, 21, 18, 59, 54).unwrap();
        let v = Value::Date(dt);
        let j = v.to_json();
        assert_eq!(j, json!({"$date": "2004-03-21T18:59:54Z"}));
        assert_eq!(Value::from_json(&j), v);
    }

    #[test]
    fn test_nested_from_json_preserves_structure() {
        let v = Value::from_json(&json!({"a": {"b": [1, "x", null]}}));
        let doc = v.as_document().unwrap();
        let inner = doc.get("a").unwrap().as_document().unwrap();
        let arr = inner.get("b").unwrap().as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0], Value::Int(1));
        assert_eq!(arr[2], Value::Null);
    }
}
