// src/document.rs
// Insertion-ordered document type

use crate::value::Value;
use serde_json::{Map, Value as Json};

/// An ordered mapping from field name to [`Value`].
///
/// Field order is insertion order and is significant: projection and group
/// output rely on it, and document comparison is element-wise in order.
/// Stages never mutate their input documents; they build new ones, so a
/// buffered upstream document is never invalidated by a downstream stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> Self {
        Document {
            fields: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Top-level field lookup (no dot notation; see `value_utils::get_path`)
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == field)
    }

    /// Insert a field, keeping the existing position when the field is
    /// already present. Inserting `Missing` removes the field instead:
    /// a document never stores an explicit absence.
    pub fn insert(&mut self, field: &str, value: Value) {
        if value.is_missing() {
            self.remove(field);
            return;
        }
        if let Some(slot) = self.fields.iter_mut().find(|(name, _)| name == field) {
            slot.1 = value;
        } else {
            self.fields.push((field.to_string(), value));
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(name, _)| name == field)?;
        Some(self.fields.remove(idx).1)
    }

    /// Fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter().map(|(k, v)| (k, v))
    }

    /// Field names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Build from a list of (name, value) pairs; `Missing` values are
    /// dropped, duplicate names keep the last value at the first position.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let mut doc = Document::new();
        for (name, value) in pairs {
            doc.insert(name.as_ref(), value);
        }
        doc
    }

    /// Build from a JSON object map. With serde_json's `preserve_order`
    /// feature the map iterates in source order, which becomes the
    /// document's field order.
    pub fn from_json_object(map: &Map<String, Json>) -> Self {
        let mut doc = Document::with_capacity(map.len());
        for (name, value) in map {
            doc.insert(name, Value::from_json(value));
        }
        doc
    }

    /// Parse a document from any JSON value, failing on non-objects.
    pub fn from_json(json: &Json) -> Option<Self> {
        match Value::from_json(json) {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Json {
        let mut map = Map::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        Json::Object(map)
    }
}

impl serde::Serialize for Document {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (name, value) in iter {
            doc.insert(&name, value);
        }
        doc
    }
}
