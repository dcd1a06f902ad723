// src/query/operators.rs
//! Query operator implementations for the find-style filter language.
//!
//! Each operator ($eq, $gt, $and, ...) is a separate type implementing the
//! `OperatorMatcher` trait, dispatched through a registry keyed by operator
//! name. Logical operators receive the full document so they can recurse
//! into `matches_filter`.

use crate::document::Document;
use crate::error::{AnvilError, Result};
use crate::value::Value;
use crate::value_utils::get_path;
use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::num::NonZeroUsize;

// ============================================================================
// REGEX CACHE
// ============================================================================

lazy_static! {
    /// Compiled-regex cache, keyed by "pattern:options".
    /// LRU with 100 entries so repeated filters don't recompile.
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(100).unwrap()));
}

/// Prefix the pattern with inline flags for the supported options
/// (i, m, s, x), dropping anything unrecognized.
fn build_regex_pattern(pattern: &str, options: &str) -> String {
    let valid_options: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();

    if valid_options.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", valid_options, pattern)
    }
}

fn get_or_compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let cache_key = format!("{}:{}", pattern, options);

    {
        let mut cache = REGEX_CACHE.lock();
        if let Some(regex) = cache.get(&cache_key) {
            return Ok(regex.clone());
        }
    }

    let regex = Regex::new(&build_regex_pattern(pattern, options)).map_err(|e| {
        AnvilError::InvalidQuery(format!("invalid regex pattern '{}': {}", pattern, e))
    })?;

    REGEX_CACHE.lock().put(cache_key, regex.clone());
    Ok(regex)
}

fn regex_match_with_options(text: &str, pattern: &str, options: &str) -> Result<bool> {
    let regex = get_or_compile_regex(pattern, options)?;
    Ok(regex.is_match(text))
}

/// Match a document value against a pattern: strings directly, arrays by
/// any string element.
pub(crate) fn regex_matches_value(doc_value: &Value, pattern: &str, options: &str) -> Result<bool> {
    match doc_value {
        Value::String(s) => regex_match_with_options(s, pattern, options),
        Value::Array(items) => {
            for item in items {
                if let Value::String(s) = item {
                    if regex_match_with_options(s, pattern, options)? {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

// ============================================================================
// TRAIT DEFINITION
// ============================================================================

/// Uniform interface for filter operators.
///
/// `doc_value` is the resolved field value, `Value::Missing` when the path
/// is absent. `document` is the full document, present only for operators
/// that recurse into sub-filters ($and, $or, $nor, $not).
pub trait OperatorMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(
        &self,
        doc_value: &Value,
        filter_value: &Json,
        document: Option<&Document>,
    ) -> Result<bool>;
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// Filter-side equality. A null filter value matches both null and missing
/// fields; everything else is structural equality with numeric types unified.
fn values_equal(doc_value: &Value, filter_value: &Value) -> bool {
    if filter_value.is_null() {
        return doc_value.is_nullish();
    }
    doc_value.compare(filter_value) == Ordering::Equal
}

/// Equality with implicit array membership: an array field matches when it
/// equals the filter value as a whole or when any element does.
fn equality_matches(doc_value: &Value, filter_value: &Value) -> bool {
    if values_equal(doc_value, filter_value) {
        return true;
    }
    if let Value::Array(items) = doc_value {
        items.iter().any(|item| values_equal(item, filter_value))
    } else {
        false
    }
}

/// Type-bracketed ordering: values only compare within the same type
/// bracket (all numbers form one bracket). Cross-bracket comparisons and
/// missing fields yield None, which no range operator matches.
fn bracketed_compare(doc_value: &Value, filter_value: &Value) -> Option<Ordering> {
    if doc_value.is_missing() {
        return None;
    }
    let same_bracket = (doc_value.is_numeric() && filter_value.is_numeric())
        || doc_value.type_rank() == filter_value.type_rank();
    if same_bracket {
        Some(doc_value.compare(filter_value))
    } else {
        None
    }
}

/// Shared body of $gt/$gte/$lt/$lte: direct comparison first, then array
/// element matching.
fn compare_with_predicate<F>(doc_value: &Value, filter_value: &Json, predicate: F) -> Result<bool>
where
    F: Fn(Ordering) -> bool,
{
    let filter = Value::from_json(filter_value);
    if let Some(ordering) = bracketed_compare(doc_value, &filter) {
        if predicate(ordering) {
            return Ok(true);
        }
    }
    if let Value::Array(items) = doc_value {
        Ok(items.iter().any(|item| {
            bracketed_compare(item, &filter)
                .map(&predicate)
                .unwrap_or(false)
        }))
    } else {
        Ok(false)
    }
}

pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, doc_value: &Value, filter_value: &Json, _: Option<&Document>) -> Result<bool> {
        Ok(equality_matches(doc_value, &Value::from_json(filter_value)))
    }
}

pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(&self, doc_value: &Value, filter_value: &Json, _: Option<&Document>) -> Result<bool> {
        Ok(!equality_matches(doc_value, &Value::from_json(filter_value)))
    }
}

pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(&self, doc_value: &Value, filter_value: &Json, _: Option<&Document>) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| ord == Ordering::Greater)
    }
}

pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(&self, doc_value: &Value, filter_value: &Json, _: Option<&Document>) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| {
            matches!(ord, Ordering::Greater | Ordering::Equal)
        })
    }
}

pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(&self, doc_value: &Value, filter_value: &Json, _: Option<&Document>) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| ord == Ordering::Less)
    }
}

pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(&self, doc_value: &Value, filter_value: &Json, _: Option<&Document>) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| {
            matches!(ord, Ordering::Less | Ordering::Equal)
        })
    }
}

// ============================================================================
// ARRAY OPERATORS
// ============================================================================

pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(&self, doc_value: &Value, filter_value: &Json, _: Option<&Document>) -> Result<bool> {
        let candidates = match filter_value {
            Json::Array(items) => items,
            _ => {
                return Err(AnvilError::InvalidQuery(
                    "$in operator requires an array".to_string(),
                ))
            }
        };
        Ok(candidates
            .iter()
            .any(|c| equality_matches(doc_value, &Value::from_json(c))))
    }
}

pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(
        &self,
        doc_value: &Value,
        filter_value: &Json,
        document: Option<&Document>,
    ) -> Result<bool> {
        Ok(!InOperator.matches(doc_value, filter_value, document)?)
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(&self, doc_value: &Value, filter_value: &Json, _: Option<&Document>) -> Result<bool> {
        match filter_value {
            Json::Bool(should_exist) => Ok(!doc_value.is_missing() == *should_exist),
            _ => Err(AnvilError::InvalidQuery(
                "$exists operator requires a boolean".to_string(),
            )),
        }
    }
}

pub struct RegexOperator;

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn matches(&self, doc_value: &Value, filter_value: &Json, _: Option<&Document>) -> Result<bool> {
        match filter_value {
            Json::String(pattern) => regex_matches_value(doc_value, pattern, ""),
            _ => Err(AnvilError::InvalidQuery(
                "$regex operator requires a string pattern".to_string(),
            )),
        }
    }
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

fn require_document<'a>(op: &str, document: Option<&'a Document>) -> Result<&'a Document> {
    document.ok_or_else(|| {
        AnvilError::InvalidQuery(format!("{} operator requires document context", op))
    })
}

fn require_conditions<'a>(op: &str, filter_value: &'a Json) -> Result<&'a Vec<Json>> {
    match filter_value {
        Json::Array(conditions) => Ok(conditions),
        _ => Err(AnvilError::InvalidQuery(format!(
            "{} operator requires an array",
            op
        ))),
    }
}

pub struct AndOperator;

impl OperatorMatcher for AndOperator {
    fn name(&self) -> &'static str {
        "$and"
    }

    fn matches(
        &self,
        _doc_value: &Value,
        filter_value: &Json,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = require_document("$and", document)?;
        for condition in require_conditions("$and", filter_value)? {
            if !matches_filter(doc, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub struct OrOperator;

impl OperatorMatcher for OrOperator {
    fn name(&self) -> &'static str {
        "$or"
    }

    fn matches(
        &self,
        _doc_value: &Value,
        filter_value: &Json,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = require_document("$or", document)?;
        for condition in require_conditions("$or", filter_value)? {
            if matches_filter(doc, condition)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub struct NorOperator;

impl OperatorMatcher for NorOperator {
    fn name(&self) -> &'static str {
        "$nor"
    }

    fn matches(
        &self,
        _doc_value: &Value,
        filter_value: &Json,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = require_document("$nor", document)?;
        for condition in require_conditions("$nor", filter_value)? {
            if matches_filter(doc, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// $not wraps an operator object ({ field: { $not: { $gt: 5 } } }) and
/// negates the wrapped condition against the same field value.
pub struct NotOperator;

impl OperatorMatcher for NotOperator {
    fn name(&self) -> &'static str {
        "$not"
    }

    fn matches(
        &self,
        doc_value: &Value,
        filter_value: &Json,
        document: Option<&Document>,
    ) -> Result<bool> {
        Ok(!matches_condition(doc_value, filter_value, document)?)
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Registry mapping operator names to their implementations.
    /// Initialized once, immutable thereafter; all matchers are Send + Sync.
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();

        registry.insert("$eq", Box::new(EqOperator));
        registry.insert("$ne", Box::new(NeOperator));
        registry.insert("$gt", Box::new(GtOperator));
        registry.insert("$gte", Box::new(GteOperator));
        registry.insert("$lt", Box::new(LtOperator));
        registry.insert("$lte", Box::new(LteOperator));

        registry.insert("$in", Box::new(InOperator));
        registry.insert("$nin", Box::new(NinOperator));

        registry.insert("$exists", Box::new(ExistsOperator));
        registry.insert("$regex", Box::new(RegexOperator));

        registry.insert("$and", Box::new(AndOperator));
        registry.insert("$or", Box::new(OrOperator));
        registry.insert("$nor", Box::new(NorOperator));
        registry.insert("$not", Box::new(NotOperator));

        registry
    };
}

// ============================================================================
// FILTER MATCHING
// ============================================================================

/// Match one field condition against its resolved value. The condition is
/// either an operator object ({$gt: 5, $lt: 10}) or a literal (implicit
/// equality).
fn matches_condition(
    doc_value: &Value,
    condition: &Json,
    document: Option<&Document>,
) -> Result<bool> {
    if let Json::Object(condition_obj) = condition {
        let is_operator_object = condition_obj.keys().any(|k| k.starts_with('$'));
        if is_operator_object {
            // $options only modifies $regex, handled as a pair
            if let Some(pattern_json) = condition_obj.get("$regex") {
                let pattern = pattern_json.as_str().ok_or_else(|| {
                    AnvilError::InvalidQuery("$regex requires a string pattern".to_string())
                })?;
                let options = condition_obj
                    .get("$options")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                if !regex_matches_value(doc_value, pattern, options)? {
                    return Ok(false);
                }
            }

            for (op_name, op_value) in condition_obj {
                if op_name == "$regex" || op_name == "$options" {
                    continue;
                }
                let operator = OPERATOR_REGISTRY.get(op_name.as_str()).ok_or_else(|| {
                    AnvilError::InvalidQuery(format!("unknown query operator: {}", op_name))
                })?;
                if !operator.matches(doc_value, op_value, document)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }
    // Literal condition: implicit equality (with array membership)
    Ok(equality_matches(doc_value, &Value::from_json(condition)))
}

/// Main entry point: does `document` satisfy the filter?
///
/// The filter is a JSON object whose keys are either top-level logical
/// operators ($and, $or, $nor) or dotted field paths with conditions.
/// All top-level entries are implicitly ANDed.
pub fn matches_filter(document: &Document, filter: &Json) -> Result<bool> {
    let filter_obj = filter
        .as_object()
        .ok_or_else(|| AnvilError::InvalidQuery("filter must be an object".to_string()))?;

    for (key, condition) in filter_obj {
        if key.starts_with('$') {
            let operator = OPERATOR_REGISTRY.get(key.as_str()).ok_or_else(|| {
                AnvilError::InvalidQuery(format!("unknown query operator: {}", key))
            })?;
            if !operator.matches(&Value::Missing, condition, Some(document))? {
                return Ok(false);
            }
        } else {
            let doc_value = get_path(document, key);
            if !matches_condition(&doc_value, condition, Some(document))? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
