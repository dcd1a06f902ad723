// src/database.rs
// In-memory collection store and the aggregate command entry point

use crate::aggregation::Pipeline;
use crate::document::Document;
use crate::error::{AnvilError, Result};
use crate::value::Value;
use crate::{log_debug, log_info, log_warn};
use ahash::AHashMap;
use serde_json::{json, Value as Json};

/// An in-memory database: named collections of insertion-ordered documents,
/// queried through aggregation pipelines.
#[derive(Debug, Default)]
pub struct DatabaseCore {
    collections: AHashMap<String, Vec<Document>>,
}

impl DatabaseCore {
    pub fn new() -> Self {
        DatabaseCore {
            collections: AHashMap::new(),
        }
    }

    /// Append one document, creating the collection on first use.
    pub fn insert(&mut self, collection: &str, doc: Document) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Insert from JSON: a single object, or an array of objects inserted
    /// in order.
    pub fn insert_json(&mut self, collection: &str, json: &Json) -> Result<usize> {
        let docs = match json {
            Json::Array(items) => items
                .iter()
                .map(|item| {
                    Document::from_json(item).ok_or_else(|| {
                        AnvilError::InvalidQuery("inserted values must be objects".to_string())
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            other => vec![Document::from_json(other).ok_or_else(|| {
                AnvilError::InvalidQuery("inserted values must be objects".to_string())
            })?],
        };
        let count = docs.len();
        for doc in docs {
            self.insert(collection, doc);
        }
        log_debug!("inserted {} document(s) into {}", count, collection);
        Ok(count)
    }

    pub fn drop_collection(&mut self, name: &str) -> bool {
        let existed = self.collections.remove(name).is_some();
        if existed {
            log_info!("dropped collection {}", name);
        }
        existed
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// All documents of a collection, in insertion order.
    pub fn scan(&self, collection: &str) -> Result<&[Document]> {
        self.collections
            .get(collection)
            .map(|docs| docs.as_slice())
            .ok_or_else(|| AnvilError::CollectionNotFound(collection.to_string()))
    }

    /// Run an aggregation pipeline over a collection.
    pub fn aggregate(&self, collection: &str, pipeline_json: &Json) -> Result<Vec<Document>> {
        let pipeline = Pipeline::from_json(pipeline_json)?;
        let docs = self.scan(collection)?.to_vec();
        log_debug!("aggregate on {}: {} input document(s)", collection, docs.len());
        pipeline.execute(docs)
    }

    /// Command-style wrapper around `aggregate`, producing the legacy reply
    /// shape: `{ok: 1, result: [...]}` on success, `{ok: 0, errmsg: "..."}`
    /// on failure.
    pub fn run_aggregate_command(&self, collection: &str, pipeline_json: &Json) -> Json {
        match self.aggregate(collection, pipeline_json) {
            Ok(docs) => {
                let result: Vec<Json> = docs.iter().map(Document::to_json).collect();
                json!({"ok": 1, "result": result})
            }
            Err(e) => {
                log_warn!("aggregate on {} failed: {}", collection, e);
                json!({"ok": 0, "errmsg": e.to_string()})
            }
        }
    }

    /// Count of documents in a collection, zero when it doesn't exist.
    pub fn count(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, Vec::len)
    }

    /// Distinct values of a dotted path across a collection, first-seen
    /// order, arrays contributing each element.
    pub fn distinct(&self, collection: &str, path: &str) -> Result<Vec<Value>> {
        let mut seen: Vec<Value> = Vec::new();
        for doc in self.scan(collection)? {
            let v = crate::value_utils::get_path(doc, path);
            let candidates = match v {
                Value::Missing => continue,
                Value::Array(items) => items,
                other => vec![other],
            };
            for candidate in candidates {
                if !seen.iter().any(|existing| *existing == candidate) {
                    seen.push(candidate);
                }
            }
        }
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> DatabaseCore {
        let mut db = DatabaseCore::new();
        db.insert_json(
            "article",
            &json!([
                {"_id": 1, "author": "bob", "pageViews": 5, "tags": ["fun", "good"]},
                {"_id": 2, "author": "dave", "pageViews": 7, "tags": ["fun", "nasty"]},
                {"_id": 3, "author": "jane", "pageViews": 6, "tags": ["nasty", "filthy"]}
            ]),
        )
        .unwrap();
        db
    }

    #[test]
    fn test_insert_and_scan_preserve_order() {
        let db = seeded();
        let docs = db.scan("article").unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].get("author"), Some(&Value::from("bob")));
        assert_eq!(docs[2].get("author"), Some(&Value::from("jane")));
    }

    #[test]
    fn test_insert_json_rejects_non_objects() {
        let mut db = DatabaseCore::new();
        assert!(db.insert_json("c", &json!([1, 2])).is_err());
        assert!(db.insert_json("c", &json!("nope")).is_err());
    }

    #[test]
    fn test_scan_unknown_collection() {
        let db = DatabaseCore::new();
        assert!(matches!(
            db.scan("nope"),
            Err(AnvilError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_drop_collection() {
        let mut db = seeded();
        assert!(db.drop_collection("article"));
        assert!(!db.drop_collection("article"));
        assert!(db.scan("article").is_err());
    }

    #[test]
    fn test_aggregate_runs_pipeline() {
        let db = seeded();
        let docs = db
            .aggregate("article", &json!([{"$match": {"author": "dave"}}]))
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("pageViews"), Some(&Value::Int(7)));
    }

    #[test]
    fn test_run_aggregate_command_success_shape() {
        let db = seeded();
        let reply = db.run_aggregate_command("article", &json!([{"$limit": 1}]));
        assert_eq!(reply["ok"], json!(1));
        assert_eq!(reply["result"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_run_aggregate_command_error_shape() {
        let db = seeded();
        let reply = db.run_aggregate_command("article", &json!([{"$bogus": {}}]));
        assert_eq!(reply["ok"], json!(0));
        assert!(reply["errmsg"].as_str().unwrap().contains("$bogus"));
        // missing collection is also a command error, not a panic
        let reply = db.run_aggregate_command("nope", &json!([]));
        assert_eq!(reply["ok"], json!(0));
    }

    #[test]
    fn test_count_and_collection_names() {
        let db = seeded();
        assert_eq!(db.count("article"), 3);
        assert_eq!(db.count("nope"), 0);
        assert_eq!(db.collection_names(), vec!["article".to_string()]);
    }

    #[test]
    fn test_distinct_flattens_arrays() {
        let db = seeded();
        let tags = db.distinct("article", "tags").unwrap();
        let expected: Vec<Value> = ["fun", "good", "nasty", "filthy"]
            .iter()
            .map(|s| Value::from(*s))
            .collect();
        assert_eq!(tags, expected);
    }
}
