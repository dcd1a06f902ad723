// src/query.rs
//! Find-style query filters.
//!
//! Matching is operator-based: individual operator implementations live in
//! the `operators` submodule and are dispatched through a registry, so new
//! operators can be added without touching the matching loop.

pub mod operators;

pub use operators::matches_filter;

use crate::document::Document;
use crate::error::Result;
use serde_json::Value as Json;

/// A parsed filter, stored in its JSON form and validated lazily by the
/// operator registry at match time.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    json: Json,
}

impl Filter {
    /// The empty filter, matching every document.
    pub fn all() -> Self {
        Filter {
            json: Json::Object(serde_json::Map::new()),
        }
    }

    pub fn from_json(json: &Json) -> Self {
        Filter { json: json.clone() }
    }

    pub fn matches(&self, document: &Document) -> Result<bool> {
        operators::matches_filter(document, &self.json)
    }

    pub fn as_json(&self) -> &Json {
        &self.json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_matches_all() {
        let doc = Document::from_json(&json!({"a": 1})).unwrap();
        assert!(Filter::all().matches(&doc).unwrap());
    }

    #[test]
    fn test_filter_wraps_operator_matching() {
        let doc = Document::from_json(&json!({"pageViews": 9})).unwrap();
        let filter = Filter::from_json(&json!({"pageViews": {"$gt": 7}}));
        assert!(filter.matches(&doc).unwrap());
        let filter = Filter::from_json(&json!({"pageViews": {"$lt": 7}}));
        assert!(!filter.matches(&doc).unwrap());
    }

    #[test]
    fn test_malformed_filter_is_an_error() {
        let doc = Document::from_json(&json!({})).unwrap();
        assert!(Filter::from_json(&json!([1, 2])).matches(&doc).is_err());
    }
}
