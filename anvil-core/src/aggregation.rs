// src/aggregation.rs
// Aggregation pipeline: stage parsing and execution

pub mod accumulators;

use crate::document::Document;
use crate::error::{AnvilError, Result};
use crate::expression::Expression;
use crate::log_debug;
use crate::query::Filter;
use crate::value::Value;
use crate::value_utils::{canonical_key, get_path, set_path};
use accumulators::create_accumulator;
use ahash::AHashMap;
use serde_json::Value as Json;

/// A parsed aggregation pipeline: an ordered list of stages, each consuming
/// the document batch produced by the previous one.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Project(ProjectStage),
    Unwind(UnwindStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(LimitStage),
    Skip(SkipStage),
}

impl Pipeline {
    /// Parse a pipeline from its JSON array form. An empty array is a valid
    /// pipeline that passes documents through unchanged.
    pub fn from_json(pipeline_json: &Json) -> Result<Self> {
        let stages_array = match pipeline_json {
            Json::Array(stages) => stages,
            _ => {
                return Err(AnvilError::InvalidPipeline(
                    "pipeline must be an array".to_string(),
                ))
            }
        };

        let stages = stages_array
            .iter()
            .map(Stage::from_json)
            .collect::<Result<Vec<_>>>()?;

        Ok(Pipeline { stages })
    }

    /// Run every stage in order over the input batch.
    pub fn execute(&self, mut docs: Vec<Document>) -> Result<Vec<Document>> {
        for stage in &self.stages {
            let before = docs.len();
            docs = stage.execute(docs)?;
            log_debug!("{}: {} -> {} documents", stage.name(), before, docs.len());
        }
        Ok(docs)
    }
}

impl Stage {
    fn from_json(stage_json: &Json) -> Result<Self> {
        let obj = match stage_json {
            Json::Object(obj) => obj,
            _ => {
                return Err(AnvilError::InvalidPipeline(
                    "stage must be an object".to_string(),
                ))
            }
        };

        // Each stage is a single-key object naming its operator
        if obj.len() != 1 {
            return Err(AnvilError::InvalidPipeline(
                "stage must have exactly one operator".to_string(),
            ));
        }
        let (stage_name, stage_spec) = match obj.iter().next() {
            Some(entry) => entry,
            None => {
                return Err(AnvilError::InvalidPipeline(
                    "stage must have exactly one operator".to_string(),
                ))
            }
        };

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage::from_json(stage_spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec)?)),
            "$unwind" => Ok(Stage::Unwind(UnwindStage::from_json(stage_spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec)?)),
            "$sort" => Ok(Stage::Sort(SortStage::from_json(stage_spec)?)),
            "$limit" => Ok(Stage::Limit(LimitStage::from_json(stage_spec)?)),
            "$skip" => Ok(Stage::Skip(SkipStage::from_json(stage_spec)?)),
            _ => Err(AnvilError::InvalidPipeline(format!(
                "unknown pipeline stage: {}",
                stage_name
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Unwind(_) => "$unwind",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
        }
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        match self {
            Stage::Match(stage) => stage.execute(docs),
            Stage::Project(stage) => stage.execute(docs),
            Stage::Unwind(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => stage.execute(docs),
            Stage::Limit(stage) => stage.execute(docs),
            Stage::Skip(stage) => stage.execute(docs),
        }
    }
}

// ============================================================================
// $match
// ============================================================================

/// $match - keep only documents satisfying a find-style filter.
#[derive(Debug, Clone)]
pub struct MatchStage {
    filter: Filter,
}

impl MatchStage {
    fn from_json(spec: &Json) -> Result<Self> {
        if !spec.is_object() {
            return Err(AnvilError::InvalidPipeline(
                "$match specification must be an object".to_string(),
            ));
        }
        Ok(MatchStage {
            filter: Filter::from_json(spec),
        })
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        for doc in docs {
            if self.filter.matches(&doc)? {
                out.push(doc);
            }
        }
        Ok(out)
    }
}

// ============================================================================
// $project
// ============================================================================

/// $project - reshape each document.
///
/// The spec maps output field names to either an inclusion flag, a nested
/// sub-projection, or a computed expression. `_id` is carried through by
/// default and is the only field that may be excluded.
#[derive(Debug, Clone)]
pub struct ProjectStage {
    include_id: bool,
    entries: Vec<(String, ProjectField)>,
}

#[derive(Debug, Clone)]
enum ProjectField {
    /// `field: 1` - copy the input value through
    Include,
    /// Nested spec, from a dotted key ("comments.author": 1) or an
    /// explicit sub-object mixing inclusions and expressions
    Subtree(Vec<(String, ProjectField)>),
    /// Computed output; field paths resolve from the document root
    Computed(Expression),
}

impl ProjectStage {
    fn from_json(spec: &Json) -> Result<Self> {
        let obj = match spec {
            Json::Object(obj) => obj,
            _ => {
                return Err(AnvilError::InvalidPipeline(
                    "$project specification must be an object".to_string(),
                ))
            }
        };
        if obj.is_empty() {
            return Err(AnvilError::InvalidPipeline(
                "$project requires at least one field".to_string(),
            ));
        }

        let mut include_id = true;
        let mut entries: Vec<(String, ProjectField)> = Vec::new();
        for (key, value) in obj {
            if key == "_id" {
                match Self::parse_flag(value) {
                    Some(true) => include_id = true,
                    Some(false) => include_id = false,
                    None => {
                        entries.push(("_id".to_string(), Self::parse_field("_id", value)?));
                    }
                }
                continue;
            }
            if Self::parse_flag(value) == Some(false) {
                return Err(AnvilError::InvalidPipeline(format!(
                    "only _id may be excluded, not {}",
                    key
                )));
            }
            let field = Self::parse_field(key, value)?;
            // dotted keys become nested subtrees under their first segment
            match key.split_once('.') {
                Some((head, rest)) => {
                    Self::merge_dotted(&mut entries, head, rest, field)?;
                }
                None => entries.push((key.clone(), field)),
            }
        }

        Ok(ProjectStage {
            include_id,
            entries,
        })
    }

    /// A numeric or boolean spec value is an inclusion/exclusion flag.
    fn parse_flag(value: &Json) -> Option<bool> {
        match value {
            Json::Bool(b) => Some(*b),
            Json::Number(n) => Some(n.as_f64() != Some(0.0)),
            _ => None,
        }
    }

    fn parse_field(key: &str, value: &Json) -> Result<ProjectField> {
        match Self::parse_flag(value) {
            Some(true) => return Ok(ProjectField::Include),
            Some(false) => {
                return Err(AnvilError::InvalidPipeline(format!(
                    "only _id may be excluded, not {}",
                    key
                )))
            }
            None => {}
        }
        if let Json::Object(obj) = value {
            // A sub-object without operator keys is a nested projection spec
            if !obj.keys().any(|k| k.starts_with('$')) {
                let mut sub = Vec::new();
                for (sub_key, sub_value) in obj {
                    let field = Self::parse_field(sub_key, sub_value)?;
                    match sub_key.split_once('.') {
                        Some((head, rest)) => Self::merge_dotted(&mut sub, head, rest, field)?,
                        None => sub.push((sub_key.clone(), field)),
                    }
                }
                return Ok(ProjectField::Subtree(sub));
            }
        }
        Ok(ProjectField::Computed(Expression::from_json(value)?))
    }

    fn merge_dotted(
        entries: &mut Vec<(String, ProjectField)>,
        head: &str,
        rest: &str,
        field: ProjectField,
    ) -> Result<()> {
        let leaf = match rest.split_once('.') {
            Some((next, tail)) => {
                let mut sub = Vec::new();
                Self::merge_dotted(&mut sub, next, tail, field)?;
                ProjectField::Subtree(sub)
            }
            None => ProjectField::Subtree(vec![(rest.to_string(), field)]),
        };
        // fold into an existing subtree for the same first segment
        if let Some((_, ProjectField::Subtree(existing))) =
            entries.iter_mut().find(|(name, _)| name == head)
        {
            if let ProjectField::Subtree(mut new_entries) = leaf {
                existing.append(&mut new_entries);
            }
            return Ok(());
        }
        entries.push((head.to_string(), leaf));
        Ok(())
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        docs.iter().map(|doc| self.project_document(doc)).collect()
    }

    fn project_document(&self, doc: &Document) -> Result<Document> {
        let mut out = Document::new();
        if self.include_id {
            if let Some(id) = doc.get("_id") {
                out.insert("_id", id.clone());
            }
        }
        apply_entries(&mut out, &self.entries, Some(doc), doc)?;
        Ok(out)
    }
}

/// Project `current` through `entries` into `out`.
///
/// Output field order follows the input document: while walking the input's
/// fields in order, each one named by the spec is emitted at its input
/// position (computed fields are evaluated there). Spec entries with no
/// input counterpart are appended afterwards in declaration order.
fn apply_entries(
    out: &mut Document,
    entries: &[(String, ProjectField)],
    current: Option<&Document>,
    root: &Document,
) -> Result<()> {
    let mut emitted: Vec<bool> = vec![false; entries.len()];

    if let Some(current) = current {
        for (input_name, input_value) in current.iter() {
            if input_name == "_id" {
                continue;
            }
            let position = entries.iter().position(|(name, _)| name == input_name);
            if let Some(idx) = position {
                emitted[idx] = true;
                let projected = project_field(&entries[idx].1, Some(input_value), root)?;
                out.insert(input_name, projected);
            }
        }
    }

    for (idx, (name, field)) in entries.iter().enumerate() {
        if emitted[idx] {
            continue;
        }
        let projected = project_field(field, None, root)?;
        out.insert(name, projected);
    }
    Ok(())
}

/// Project one spec entry given the matching input value (if any).
fn project_field(
    field: &ProjectField,
    input_value: Option<&Value>,
    root: &Document,
) -> Result<Value> {
    match field {
        ProjectField::Include => Ok(input_value.cloned().unwrap_or(Value::Missing)),
        ProjectField::Computed(expr) => expr.evaluate(root),
        ProjectField::Subtree(sub) => match input_value {
            Some(Value::Document(subdoc)) => {
                let mut out = Document::new();
                apply_entries(&mut out, sub, Some(subdoc), root)?;
                Ok(Value::Document(out))
            }
            Some(Value::Array(items)) => {
                // sub-projection distributes over arrays; non-document
                // elements are dropped
                let mut projected = Vec::new();
                for item in items {
                    if let Value::Document(subdoc) = item {
                        let mut out = Document::new();
                        apply_entries(&mut out, sub, Some(subdoc), root)?;
                        projected.push(Value::Document(out));
                    }
                }
                Ok(Value::Array(projected))
            }
            // no input: computed leaves still produce output
            _ => {
                let mut out = Document::new();
                apply_entries(&mut out, sub, None, root)?;
                if out.is_empty() {
                    Ok(Value::Missing)
                } else {
                    Ok(Value::Document(out))
                }
            }
        },
    }
}

// ============================================================================
// $unwind
// ============================================================================

/// $unwind - emit one output document per element of an array field, with
/// the array leaf replaced by the element.
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: String,
}

impl UnwindStage {
    fn from_json(spec: &Json) -> Result<Self> {
        match spec.as_str().and_then(|s| s.strip_prefix('$')) {
            Some(path) if !path.is_empty() => Ok(UnwindStage {
                path: path.to_string(),
            }),
            _ => Err(AnvilError::InvalidPipeline(
                "$unwind requires a field path starting with $".to_string(),
            )),
        }
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        for doc in docs {
            match get_path(&doc, &self.path) {
                // a missing or null field produces no output documents
                Value::Missing | Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        out.push(set_path(&doc, &self.path, item));
                    }
                }
                other => {
                    return Err(AnvilError::UnwindPath(format!(
                        "$unwind requires an array at {}, found {}",
                        self.path,
                        other.type_name()
                    )))
                }
            }
        }
        Ok(out)
    }
}

// ============================================================================
// $group
// ============================================================================

/// $group - partition documents by a key expression and fold accumulators
/// over each partition.
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: Expression,
    /// (output field, accumulator operator, argument expression)
    fields: Vec<(String, String, Expression)>,
}

impl GroupStage {
    fn from_json(spec: &Json) -> Result<Self> {
        let obj = match spec {
            Json::Object(obj) => obj,
            _ => {
                return Err(AnvilError::InvalidPipeline(
                    "$group specification must be an object".to_string(),
                ))
            }
        };
        let id_json = obj.get("_id").ok_or_else(|| {
            AnvilError::InvalidPipeline("$group requires an _id field".to_string())
        })?;
        let id = Expression::from_json(id_json)?;

        let mut fields = Vec::new();
        for (name, value) in obj {
            if name == "_id" {
                continue;
            }
            let acc_obj = match value {
                Json::Object(acc) if acc.len() == 1 => acc,
                _ => {
                    return Err(AnvilError::InvalidPipeline(format!(
                        "group field {} must be a single-operator accumulator object",
                        name
                    )))
                }
            };
            let (op_name, arg_json) = match acc_obj.iter().next() {
                Some(entry) => entry,
                None => continue,
            };
            // validate the operator name at parse time
            create_accumulator(op_name)?;
            fields.push((
                name.clone(),
                op_name.clone(),
                Expression::from_json(arg_json)?,
            ));
        }

        Ok(GroupStage { id, fields })
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        struct GroupState {
            key: Value,
            accumulators: Vec<Box<dyn accumulators::Accumulator>>,
        }

        // canonical key string -> group, plus first-seen order
        let mut groups: AHashMap<String, GroupState> = AHashMap::new();
        let mut order: Vec<String> = Vec::new();

        for doc in &docs {
            let mut key = self.id.evaluate(doc)?;
            if key.is_missing() {
                key = Value::Null;
            }
            let canonical = canonical_key(&key);

            if !groups.contains_key(&canonical) {
                let mut accs = Vec::with_capacity(self.fields.len());
                for (_, op_name, _) in &self.fields {
                    accs.push(create_accumulator(op_name)?);
                }
                groups.insert(
                    canonical.clone(),
                    GroupState {
                        key,
                        accumulators: accs,
                    },
                );
                order.push(canonical.clone());
            }

            let state = match groups.get_mut(&canonical) {
                Some(state) => state,
                None => continue,
            };
            for (idx, (_, _, arg)) in self.fields.iter().enumerate() {
                state.accumulators[idx].accumulate(arg.evaluate(doc)?);
            }
        }

        let mut out = Vec::with_capacity(order.len());
        for canonical in order {
            let state = match groups.remove(&canonical) {
                Some(state) => state,
                None => continue,
            };
            let mut doc = Document::new();
            doc.insert("_id", state.key);
            let mut accs = state.accumulators;
            for (idx, (name, _, _)) in self.fields.iter().enumerate() {
                doc.insert(name, accs[idx].finalize());
            }
            out.push(doc);
        }
        Ok(out)
    }
}

// ============================================================================
// $sort
// ============================================================================

/// $sort - stable multi-key sort. Missing fields order before nulls, which
/// order before every other value.
#[derive(Debug, Clone)]
pub struct SortStage {
    keys: Vec<(String, SortDirection)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortStage {
    fn from_json(spec: &Json) -> Result<Self> {
        let obj = match spec {
            Json::Object(obj) => obj,
            _ => {
                return Err(AnvilError::InvalidPipeline(
                    "$sort specification must be an object".to_string(),
                ))
            }
        };
        if obj.is_empty() {
            return Err(AnvilError::InvalidPipeline(
                "$sort requires at least one key".to_string(),
            ));
        }

        let mut keys = Vec::new();
        for (field, direction) in obj {
            let direction = match direction.as_i64() {
                Some(1) => SortDirection::Ascending,
                Some(-1) => SortDirection::Descending,
                _ => {
                    return Err(AnvilError::InvalidPipeline(format!(
                        "$sort direction for {} must be 1 or -1",
                        field
                    )))
                }
            };
            keys.push((field.clone(), direction));
        }
        Ok(SortStage { keys })
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        // decorate with extracted keys so comparisons don't re-resolve paths
        let mut decorated: Vec<(Vec<Value>, Document)> = docs
            .into_iter()
            .map(|doc| {
                let keys = self
                    .keys
                    .iter()
                    .map(|(path, _)| get_path(&doc, path))
                    .collect();
                (keys, doc)
            })
            .collect();

        // sort_by is stable, so equal keys keep their input order
        decorated.sort_by(|(a, _), (b, _)| {
            for (idx, (_, direction)) in self.keys.iter().enumerate() {
                let ord = a[idx].compare(&b[idx]);
                let ord = match direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });

        Ok(decorated.into_iter().map(|(_, doc)| doc).collect())
    }
}

// ============================================================================
// $limit / $skip
// ============================================================================

/// $limit - pass through at most N documents.
#[derive(Debug, Clone)]
pub struct LimitStage {
    limit: usize,
}

impl LimitStage {
    fn from_json(spec: &Json) -> Result<Self> {
        match spec.as_u64() {
            Some(limit) => Ok(LimitStage {
                limit: limit as usize,
            }),
            None => Err(AnvilError::InvalidPipeline(
                "$limit requires a non-negative integer".to_string(),
            )),
        }
    }

    fn execute(&self, mut docs: Vec<Document>) -> Result<Vec<Document>> {
        docs.truncate(self.limit);
        Ok(docs)
    }
}

/// $skip - drop the first N documents.
#[derive(Debug, Clone)]
pub struct SkipStage {
    skip: usize,
}

impl SkipStage {
    fn from_json(spec: &Json) -> Result<Self> {
        match spec.as_u64() {
            Some(skip) => Ok(SkipStage {
                skip: skip as usize,
            }),
            None => Err(AnvilError::InvalidPipeline(
                "$skip requires a non-negative integer".to_string(),
            )),
        }
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        Ok(docs.into_iter().skip(self.skip).collect())
    }
}
