//! Dotted-path resolution and related value helpers.
//!
//! Path traversal lives here, separate from the expression evaluator, so
//! the collapse semantics can be tested in isolation.

use crate::document::Document;
use crate::value::Value;

/// Resolve a dotted path against a document, returning `Missing` when any
/// segment is absent or traversal passes through a scalar.
///
/// When an intermediate segment is an array, resolution distributes over
/// the elements and yields an array of per-element results; elements where
/// the remaining sub-path is absent are skipped, not kept as placeholders.
/// This is the "collapse" behavior: resolving `comments.author` against a
/// document whose `comments` is an array of `{author, text}` documents
/// yields `["joe", "sam"]`.
pub fn get_path(doc: &Document, path: &str) -> Value {
    let parts: Vec<&str> = path.split('.').collect();
    resolve_in_doc(doc, &parts)
}

fn resolve_in_doc(doc: &Document, parts: &[&str]) -> Value {
    match parts.split_first() {
        None => Value::Document(doc.clone()),
        Some((head, rest)) => match doc.get(head) {
            None => Value::Missing,
            Some(value) => resolve_in_value(value, rest),
        },
    }
}

fn resolve_in_value(value: &Value, parts: &[&str]) -> Value {
    if parts.is_empty() {
        return value.clone();
    }
    match value {
        Value::Document(doc) => resolve_in_doc(doc, parts),
        Value::Array(items) => {
            let mut resolved = Vec::new();
            for item in items {
                let r = resolve_in_value(item, parts);
                if !r.is_missing() {
                    resolved.push(r);
                }
            }
            Value::Array(resolved)
        }
        _ => Value::Missing,
    }
}

/// Return a new document with `value` placed at `path`, creating
/// intermediate documents as needed. Setting `Missing` omits the leaf
/// field entirely (and creates no intermediate documents for paths that
/// never existed).
pub fn set_path(doc: &Document, path: &str, value: Value) -> Document {
    let parts: Vec<&str> = path.split('.').collect();
    set_in_doc(doc, &parts, value)
}

fn set_in_doc(doc: &Document, parts: &[&str], value: Value) -> Document {
    let (head, rest) = match parts.split_first() {
        Some(split) => split,
        None => return doc.clone(),
    };
    let mut out = doc.clone();
    if rest.is_empty() {
        out.insert(head, value);
        return out;
    }
    match doc.get(head) {
        Some(Value::Document(inner)) => {
            let nested = set_in_doc(inner, rest, value);
            out.insert(head, Value::Document(nested));
        }
        _ => {
            if value.is_missing() {
                // nothing to remove below a path that doesn't exist
                return out;
            }
            let nested = set_in_doc(&Document::new(), rest, value);
            out.insert(head, Value::Document(nested));
        }
    }
    out
}

/// Canonical string key for a value, used to intern `$group` keys.
///
/// Two values produce the same key exactly when they are structurally
/// equal under the engine's equality, so `Int(1)` and `Double(1.0)` land
/// in the same group while `"1"` does not. Document keys are
/// order-sensitive, matching element-wise document equality.
pub fn canonical_key(value: &Value) -> String {
    match value {
        // a missing group key groups together with explicit null
        Value::Missing | Value::Null => "null".to_string(),
        Value::Bool(b) => format!("b:{}", b),
        Value::Int(n) => format!("n:{}", n),
        Value::Double(d) => {
            if d.fract() == 0.0 && d.is_finite() && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                format!("n:{}", *d as i64)
            } else {
                format!("n:{}", d)
            }
        }
        Value::String(s) => format!("s:{:?}", s),
        Value::Date(dt) => format!("t:{}", dt.timestamp_millis()),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_key).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Document(doc) => {
            let inner: Vec<String> = doc
                .iter()
                .map(|(k, v)| format!("{:?}:{}", k, canonical_key(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(&json).unwrap()
    }

    #[test]
    fn test_get_path_simple() {
        let d = doc(json!({"name": "bob", "pageViews": 5}));
        assert_eq!(get_path(&d, "name"), Value::from("bob"));
        assert_eq!(get_path(&d, "missing"), Value::Missing);
    }

    #[test]
    fn test_get_path_nested() {
        let d = doc(json!({"other": {"foo": 5}}));
        assert_eq!(get_path(&d, "other.foo"), Value::Int(5));
        assert_eq!(get_path(&d, "other.bar"), Value::Missing);
        assert_eq!(get_path(&d, "other.foo.deeper"), Value::Missing);
    }

    #[test]
    fn test_get_path_collapses_through_arrays() {
        // the canonical corpus case: comments.author -> ["joe", "sam"]
        let d = doc(json!({
            "comments": [
                {"author": "joe", "text": "this is cool"},
                {"author": "sam", "text": "this is bad"}
            ]
        }));
        assert_eq!(
            get_path(&d, "comments.author"),
            Value::Array(vec![Value::from("joe"), Value::from("sam")])
        );
    }

    #[test]
    fn test_get_path_array_skips_absent_elements() {
        let d = doc(json!({
            "comments": [
                {"author": "joe"},
                {"text": "no author here"},
                {"author": "sam"}
            ]
        }));
        assert_eq!(
            get_path(&d, "comments.author"),
            Value::Array(vec![Value::from("joe"), Value::from("sam")])
        );
    }

    #[test]
    fn test_get_path_through_scalar_is_missing() {
        let d = doc(json!({"a": 5}));
        assert_eq!(get_path(&d, "a.b"), Value::Missing);
    }

    #[test]
    fn test_set_path_top_level() {
        let d = doc(json!({"a": 1}));
        let out = set_path(&d, "b", Value::Int(2));
        assert_eq!(out.to_json(), json!({"a": 1, "b": 2}));
        // original untouched
        assert_eq!(d.to_json(), json!({"a": 1}));
    }

    #[test]
    fn test_set_path_replaces_leaf_in_place() {
        let d = doc(json!({"b": {"e": 7, "f": [4, 3]}}));
        let out = set_path(&d, "b.f", Value::Int(4));
        assert_eq!(out.to_json(), json!({"b": {"e": 7, "f": 4}}));
    }

    #[test]
    fn test_set_path_creates_intermediate_documents() {
        let d = Document::new();
        let out = set_path(&d, "x.y.z", Value::Int(1));
        assert_eq!(out.to_json(), json!({"x": {"y": {"z": 1}}}));
    }

    #[test]
    fn test_set_path_missing_omits() {
        let d = doc(json!({"a": {"b": 1, "c": 2}}));
        let out = set_path(&d, "a.b", Value::Missing);
        assert_eq!(out.to_json(), json!({"a": {"c": 2}}));

        // no intermediate documents created for a missing leaf
        let out = set_path(&Document::new(), "p.q", Value::Missing);
        assert!(out.is_empty());
    }

    #[test]
    fn test_canonical_key_numeric_identity() {
        assert_eq!(
            canonical_key(&Value::Int(1)),
            canonical_key(&Value::Double(1.0))
        );
        assert_ne!(
            canonical_key(&Value::Int(1)),
            canonical_key(&Value::from("1"))
        );
        assert_ne!(
            canonical_key(&Value::Double(1.5)),
            canonical_key(&Value::Int(1))
        );
    }

    #[test]
    fn test_canonical_key_null_and_missing_group_together() {
        assert_eq!(canonical_key(&Value::Null), canonical_key(&Value::Missing));
    }

    #[test]
    fn test_canonical_key_structured() {
        let a = Value::from_json(&json!({"tags": "fun"}));
        let b = Value::from_json(&json!({"tags": "fun"}));
        let c = Value::from_json(&json!({"tags": "good"}));
        assert_eq!(canonical_key(&a), canonical_key(&b));
        assert_ne!(canonical_key(&a), canonical_key(&c));
    }
}
