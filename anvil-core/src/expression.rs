// src/expression.rs
// Recursive expression-tree interpreter: field paths, literals, and
// operator applications evaluated against a single input document.

use crate::document::Document;
use crate::error::{AnvilError, Result};
use crate::value::Value;
use crate::value_utils::get_path;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde_json::Value as Json;

/// A parsed expression, evaluated as a pure function of one document.
#[derive(Debug, Clone)]
pub enum Expression {
    /// A constant value
    Literal(Value),
    /// `"$a.b.c"` - dotted-path field reference (stored without the `$`)
    FieldPath(String),
    /// Array literal whose elements are themselves expressions
    Array(Vec<Expression>),
    /// Document constructor: `{foo: "$pageViews", bar: "$tags"}`.
    /// Fields that evaluate to missing are omitted from the result.
    Object(Vec<(String, Expression)>),
    /// `{$op: [args...]}` operator application
    Operator(OpKind, Vec<Expression>),
}

/// Every operator the evaluator implements. Dispatch is an exhaustive
/// match so a new operator can't be added without declaring its
/// accepted operand types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    // arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    // string
    Concat,
    ToUpper,
    ToLower,
    Substr,
    StrCaseCmp,
    // conditional
    IfNull,
    Cond,
    // comparison
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Cmp,
    // boolean
    And,
    Or,
    Not,
    // date extraction
    Second,
    Minute,
    Hour,
    DayOfYear,
    DayOfMonth,
    DayOfWeek,
    Month,
    Week,
    Year,
}

impl OpKind {
    pub fn from_name(name: &str) -> Option<OpKind> {
        Some(match name {
            "$add" => OpKind::Add,
            "$subtract" => OpKind::Subtract,
            "$multiply" => OpKind::Multiply,
            "$divide" => OpKind::Divide,
            "$mod" => OpKind::Mod,
            "$concat" => OpKind::Concat,
            "$toUpper" => OpKind::ToUpper,
            "$toLower" => OpKind::ToLower,
            "$substr" => OpKind::Substr,
            "$strcasecmp" => OpKind::StrCaseCmp,
            "$ifNull" => OpKind::IfNull,
            "$cond" => OpKind::Cond,
            "$eq" => OpKind::Eq,
            "$ne" => OpKind::Ne,
            "$lt" => OpKind::Lt,
            "$lte" => OpKind::Lte,
            "$gt" => OpKind::Gt,
            "$gte" => OpKind::Gte,
            "$cmp" => OpKind::Cmp,
            "$and" => OpKind::And,
            "$or" => OpKind::Or,
            "$not" => OpKind::Not,
            "$second" => OpKind::Second,
            "$minute" => OpKind::Minute,
            "$hour" => OpKind::Hour,
            "$dayOfYear" => OpKind::DayOfYear,
            "$dayOfMonth" => OpKind::DayOfMonth,
            "$dayOfWeek" => OpKind::DayOfWeek,
            "$month" => OpKind::Month,
            "$week" => OpKind::Week,
            "$year" => OpKind::Year,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Add => "$add",
            OpKind::Subtract => "$subtract",
            OpKind::Multiply => "$multiply",
            OpKind::Divide => "$divide",
            OpKind::Mod => "$mod",
            OpKind::Concat => "$concat",
            OpKind::ToUpper => "$toUpper",
            OpKind::ToLower => "$toLower",
            OpKind::Substr => "$substr",
            OpKind::StrCaseCmp => "$strcasecmp",
            OpKind::IfNull => "$ifNull",
            OpKind::Cond => "$cond",
            OpKind::Eq => "$eq",
            OpKind::Ne => "$ne",
            OpKind::Lt => "$lt",
            OpKind::Lte => "$lte",
            OpKind::Gt => "$gt",
            OpKind::Gte => "$gte",
            OpKind::Cmp => "$cmp",
            OpKind::And => "$and",
            OpKind::Or => "$or",
            OpKind::Not => "$not",
            OpKind::Second => "$second",
            OpKind::Minute => "$minute",
            OpKind::Hour => "$hour",
            OpKind::DayOfYear => "$dayOfYear",
            OpKind::DayOfMonth => "$dayOfMonth",
            OpKind::DayOfWeek => "$dayOfWeek",
            OpKind::Month => "$month",
            OpKind::Week => "$week",
            OpKind::Year => "$year",
        }
    }

    /// (min, max) accepted argument count; max None means variadic
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            OpKind::Add | OpKind::Multiply | OpKind::Concat | OpKind::And | OpKind::Or => (1, None),
            OpKind::Subtract
            | OpKind::Divide
            | OpKind::Mod
            | OpKind::IfNull
            | OpKind::Eq
            | OpKind::Ne
            | OpKind::Lt
            | OpKind::Lte
            | OpKind::Gt
            | OpKind::Gte
            | OpKind::Cmp
            | OpKind::StrCaseCmp => (2, Some(2)),
            OpKind::Cond | OpKind::Substr => (3, Some(3)),
            OpKind::Not
            | OpKind::ToUpper
            | OpKind::ToLower
            | OpKind::Second
            | OpKind::Minute
            | OpKind::Hour
            | OpKind::DayOfYear
            | OpKind::DayOfMonth
            | OpKind::DayOfWeek
            | OpKind::Month
            | OpKind::Week
            | OpKind::Year => (1, Some(1)),
        }
    }
}

impl Expression {
    /// Parse an expression from its JSON spec form.
    ///
    /// - `"$path"` is a field reference, any other string a literal
    /// - an object whose single key starts with `$` is an operator
    /// - an object without `$` keys is a document constructor
    /// - everything else is a literal
    pub fn from_json(spec: &Json) -> Result<Self> {
        match spec {
            Json::String(s) => {
                if let Some(path) = s.strip_prefix('$') {
                    if path.is_empty() {
                        return Err(AnvilError::InvalidPipeline(
                            "field reference must name a field: '$'".to_string(),
                        ));
                    }
                    Ok(Expression::FieldPath(path.to_string()))
                } else {
                    Ok(Expression::Literal(Value::String(s.clone())))
                }
            }
            Json::Array(items) => {
                let exprs = items
                    .iter()
                    .map(Expression::from_json)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expression::Array(exprs))
            }
            Json::Object(map) => {
                let has_op_key = map.keys().any(|k| k.starts_with('$'));
                if has_op_key {
                    if map.len() != 1 {
                        return Err(AnvilError::InvalidPipeline(
                            "operator expression must have exactly one operator".to_string(),
                        ));
                    }
                    let (name, args_json) = match map.iter().next() {
                        Some(entry) => entry,
                        None => {
                            return Err(AnvilError::InvalidPipeline(
                                "empty operator expression".to_string(),
                            ))
                        }
                    };
                    let op = OpKind::from_name(name)
                        .ok_or_else(|| AnvilError::UnknownOperator(name.clone()))?;
                    let args = match args_json {
                        Json::Array(items) => items
                            .iter()
                            .map(Expression::from_json)
                            .collect::<Result<Vec<_>>>()?,
                        single => vec![Expression::from_json(single)?],
                    };
                    let (min, max) = op.arity();
                    if args.len() < min || max.map_or(false, |m| args.len() > m) {
                        return Err(AnvilError::InvalidPipeline(format!(
                            "{} takes {} argument(s), got {}",
                            op.name(),
                            match max {
                                Some(m) if m == min => format!("{}", min),
                                Some(m) => format!("{} to {}", min, m),
                                None => format!("at least {}", min),
                            },
                            args.len()
                        )));
                    }
                    Ok(Expression::Operator(op, args))
                } else {
                    let fields = map
                        .iter()
                        .map(|(name, value)| Ok((name.clone(), Expression::from_json(value)?)))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Expression::Object(fields))
                }
            }
            other => Ok(Expression::Literal(Value::from_json(other))),
        }
    }

    /// Evaluate against a document. Pure: no state outside the arguments.
    pub fn evaluate(&self, doc: &Document) -> Result<Value> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::FieldPath(path) => Ok(get_path(doc, path)),
            Expression::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let v = item.evaluate(doc)?;
                    // array literals have no holes
                    out.push(if v.is_missing() { Value::Null } else { v });
                }
                Ok(Value::Array(out))
            }
            Expression::Object(fields) => {
                let mut out = Document::with_capacity(fields.len());
                for (name, expr) in fields {
                    // insert drops missing values
                    out.insert(name, expr.evaluate(doc)?);
                }
                Ok(Value::Document(out))
            }
            Expression::Operator(op, args) => evaluate_operator(*op, args, doc),
        }
    }
}

// ============================================================================
// OPERATOR EVALUATION
// ============================================================================

fn evaluate_operator(op: OpKind, args: &[Expression], doc: &Document) -> Result<Value> {
    match op {
        OpKind::Add => eval_add(args, doc),
        OpKind::Multiply => eval_multiply(args, doc),
        OpKind::Subtract => eval_subtract(args, doc),
        OpKind::Divide => eval_divide(args, doc),
        OpKind::Mod => eval_mod(args, doc),
        OpKind::Concat => eval_concat(args, doc),
        OpKind::ToUpper | OpKind::ToLower => eval_case(op, &args[0], doc),
        OpKind::Substr => eval_substr(args, doc),
        OpKind::StrCaseCmp => eval_strcasecmp(args, doc),
        OpKind::IfNull => {
            let first = args[0].evaluate(doc)?;
            if first.is_nullish() {
                args[1].evaluate(doc)
            } else {
                Ok(first)
            }
        }
        OpKind::Cond => {
            let cond = args[0].evaluate(doc)?;
            if cond.truthy() {
                args[1].evaluate(doc)
            } else {
                args[2].evaluate(doc)
            }
        }
        OpKind::Eq | OpKind::Ne | OpKind::Lt | OpKind::Lte | OpKind::Gt | OpKind::Gte => {
            let a = args[0].evaluate(doc)?;
            let b = args[1].evaluate(doc)?;
            let ord = a.compare(&b);
            Ok(Value::Bool(match op {
                OpKind::Eq => ord == std::cmp::Ordering::Equal,
                OpKind::Ne => ord != std::cmp::Ordering::Equal,
                OpKind::Lt => ord == std::cmp::Ordering::Less,
                OpKind::Lte => ord != std::cmp::Ordering::Greater,
                OpKind::Gt => ord == std::cmp::Ordering::Greater,
                OpKind::Gte => ord != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }))
        }
        OpKind::Cmp => {
            let a = args[0].evaluate(doc)?;
            let b = args[1].evaluate(doc)?;
            Ok(Value::Int(match a.compare(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }))
        }
        OpKind::And => {
            for arg in args {
                if !arg.evaluate(doc)?.truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        OpKind::Or => {
            for arg in args {
                if arg.evaluate(doc)?.truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        OpKind::Not => Ok(Value::Bool(!args[0].evaluate(doc)?.truthy())),
        OpKind::Second
        | OpKind::Minute
        | OpKind::Hour
        | OpKind::DayOfYear
        | OpKind::DayOfMonth
        | OpKind::DayOfWeek
        | OpKind::Month
        | OpKind::Week
        | OpKind::Year => eval_date_part(op, &args[0], doc),
    }
}

/// Evaluate arguments, short-circuiting nullish propagation for the
/// arithmetic/string operators: any missing operand makes the whole
/// result missing, otherwise any null makes it null.
fn eval_propagating(args: &[Expression], doc: &Document) -> Result<Option<Vec<Value>>> {
    let mut values = Vec::with_capacity(args.len());
    let mut saw_null = false;
    for arg in args {
        let v = arg.evaluate(doc)?;
        if v.is_missing() {
            return Ok(None);
        }
        saw_null |= v.is_null();
        values.push(v);
    }
    if saw_null {
        return Ok(Some(Vec::new())); // sentinel: caller returns Null
    }
    Ok(Some(values))
}

macro_rules! propagate {
    ($args:expr, $doc:expr) => {
        match eval_propagating($args, $doc)? {
            None => return Ok(Value::Missing),
            Some(v) if v.is_empty() => return Ok(Value::Null),
            Some(v) => v,
        }
    };
}

fn eval_add(args: &[Expression], doc: &Document) -> Result<Value> {
    let values = propagate!(args, doc);
    let mut int_sum: i64 = 0;
    let mut dbl_sum: f64 = 0.0;
    let mut is_double = false;
    let mut date: Option<DateTime<Utc>> = None;
    for v in &values {
        match v {
            Value::Int(n) => match int_sum.checked_add(*n) {
                Some(s) => int_sum = s,
                None => {
                    // i64 overflow promotes the result to double
                    is_double = true;
                    dbl_sum += int_sum as f64 + *n as f64;
                    int_sum = 0;
                }
            },
            Value::Double(d) => {
                is_double = true;
                dbl_sum += d;
            }
            Value::Date(dt) => {
                if date.is_some() {
                    return Err(AnvilError::ExpressionType(
                        "$add supports at most one date operand".to_string(),
                    ));
                }
                date = Some(*dt);
            }
            other => {
                return Err(AnvilError::ExpressionType(format!(
                    "$add does not support {} operands",
                    other.type_name()
                )))
            }
        }
    }
    if let Some(dt) = date {
        // number operands are milliseconds added to the date
        let ms = if is_double {
            (dbl_sum + int_sum as f64) as i64
        } else {
            int_sum
        };
        return Ok(Value::Date(dt + Duration::milliseconds(ms)));
    }
    if is_double {
        Ok(Value::Double(dbl_sum + int_sum as f64))
    } else {
        Ok(Value::Int(int_sum))
    }
}

fn eval_multiply(args: &[Expression], doc: &Document) -> Result<Value> {
    let values = propagate!(args, doc);
    let mut int_prod: i64 = 1;
    let mut dbl_prod: f64 = 1.0;
    let mut is_double = false;
    for v in &values {
        match v {
            Value::Int(n) => match int_prod.checked_mul(*n) {
                Some(p) => int_prod = p,
                None => {
                    is_double = true;
                    dbl_prod *= int_prod as f64 * *n as f64;
                    int_prod = 1;
                }
            },
            Value::Double(d) => {
                is_double = true;
                dbl_prod *= d;
            }
            other => {
                return Err(AnvilError::ExpressionType(format!(
                    "$multiply does not support {} operands",
                    other.type_name()
                )))
            }
        }
    }
    if is_double {
        Ok(Value::Double(dbl_prod * int_prod as f64))
    } else {
        Ok(Value::Int(int_prod))
    }
}

fn eval_subtract(args: &[Expression], doc: &Document) -> Result<Value> {
    let values = propagate!(args, doc);
    match (&values[0], &values[1]) {
        (Value::Date(a), Value::Date(b)) => {
            Ok(Value::Int(a.timestamp_millis() - b.timestamp_millis()))
        }
        (Value::Date(a), b) if b.is_numeric() => {
            let ms = numeric_operand("$subtract", b)? as i64;
            Ok(Value::Date(*a - Duration::milliseconds(ms)))
        }
        (Value::Int(a), Value::Int(b)) => match a.checked_sub(*b) {
            Some(d) => Ok(Value::Int(d)),
            None => Ok(Value::Double(*a as f64 - *b as f64)),
        },
        (a, b) if a.is_numeric() && b.is_numeric() => Ok(Value::Double(
            numeric_operand("$subtract", a)? - numeric_operand("$subtract", b)?,
        )),
        (a, b) => Err(AnvilError::ExpressionType(format!(
            "$subtract does not support ({}, {}) operands",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn eval_divide(args: &[Expression], doc: &Document) -> Result<Value> {
    let values = propagate!(args, doc);
    let (a, b) = (&values[0], &values[1]);
    if !a.is_numeric() || !b.is_numeric() {
        return Err(AnvilError::ExpressionType(format!(
            "$divide does not support ({}, {}) operands",
            a.type_name(),
            b.type_name()
        )));
    }
    let divisor = numeric_operand("$divide", b)?;
    if divisor == 0.0 {
        return Err(AnvilError::Arithmetic("$divide by zero".to_string()));
    }
    Ok(Value::Double(numeric_operand("$divide", a)? / divisor))
}

fn eval_mod(args: &[Expression], doc: &Document) -> Result<Value> {
    let values = propagate!(args, doc);
    match (&values[0], &values[1]) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(AnvilError::Arithmetic("$mod by zero".to_string()));
            }
            Ok(Value::Int(a % b))
        }
        (a, b) if a.is_numeric() && b.is_numeric() => {
            let divisor = numeric_operand("$mod", b)?;
            if divisor == 0.0 {
                return Err(AnvilError::Arithmetic("$mod by zero".to_string()));
            }
            Ok(Value::Double(numeric_operand("$mod", a)? % divisor))
        }
        (a, b) => Err(AnvilError::ExpressionType(format!(
            "$mod does not support ({}, {}) operands",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn eval_concat(args: &[Expression], doc: &Document) -> Result<Value> {
    let values = propagate!(args, doc);
    let mut out = String::new();
    for v in &values {
        match v.coerce_to_string() {
            Some(s) => out.push_str(&s),
            None => {
                return Err(AnvilError::ExpressionType(format!(
                    "$concat only supports strings and numbers, not {}",
                    v.type_name()
                )))
            }
        }
    }
    Ok(Value::String(out))
}

fn eval_case(op: OpKind, arg: &Expression, doc: &Document) -> Result<Value> {
    let v = arg.evaluate(doc)?;
    if v.is_nullish() {
        return Ok(v);
    }
    match v.coerce_to_string() {
        Some(s) => Ok(Value::String(if op == OpKind::ToUpper {
            s.to_uppercase()
        } else {
            s.to_lowercase()
        })),
        None => Err(AnvilError::ExpressionType(format!(
            "{} only supports strings and numbers, not {}",
            op.name(),
            v.type_name()
        ))),
    }
}

fn eval_substr(args: &[Expression], doc: &Document) -> Result<Value> {
    let source = args[0].evaluate(doc)?;
    if source.is_nullish() {
        return Ok(source);
    }
    let s = source.coerce_to_string().ok_or_else(|| {
        AnvilError::ExpressionType(format!(
            "$substr only supports strings and numbers, not {}",
            source.type_name()
        ))
    })?;
    let start = integer_operand("$substr", &args[1].evaluate(doc)?)?;
    let length = integer_operand("$substr", &args[2].evaluate(doc)?)?;
    if start < 0 {
        return Err(AnvilError::ExpressionType(
            "$substr: starting index must be non-negative".to_string(),
        ));
    }
    // character-based; a negative length means "to the end of the string"
    let chars = s.chars().skip(start as usize);
    let out: String = if length < 0 {
        chars.collect()
    } else {
        chars.take(length as usize).collect()
    };
    Ok(Value::String(out))
}

fn eval_strcasecmp(args: &[Expression], doc: &Document) -> Result<Value> {
    let a = case_fold_operand(&args[0].evaluate(doc)?)?;
    let b = case_fold_operand(&args[1].evaluate(doc)?)?;
    Ok(Value::Int(match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}

// $strcasecmp treats nullish operands as the empty string
fn case_fold_operand(v: &Value) -> Result<String> {
    if v.is_nullish() {
        return Ok(String::new());
    }
    v.coerce_to_string().map(|s| s.to_uppercase()).ok_or_else(|| {
        AnvilError::ExpressionType(format!(
            "$strcasecmp only supports strings and numbers, not {}",
            v.type_name()
        ))
    })
}

fn numeric_operand(op: &str, v: &Value) -> Result<f64> {
    v.as_f64().ok_or_else(|| {
        AnvilError::ExpressionType(format!(
            "{} expects a numeric operand, got {}",
            op,
            v.type_name()
        ))
    })
}

fn integer_operand(op: &str, v: &Value) -> Result<i64> {
    v.as_i64().ok_or_else(|| {
        AnvilError::ExpressionType(format!(
            "{} expects an integer operand, got {}",
            op,
            v.type_name()
        ))
    })
}

fn eval_date_part(op: OpKind, arg: &Expression, doc: &Document) -> Result<Value> {
    let v = arg.evaluate(doc)?;
    if v.is_nullish() {
        return Ok(v);
    }
    let dt = match v {
        Value::Date(dt) => dt,
        other => {
            return Err(AnvilError::ExpressionType(format!(
                "{} expects a date operand, got {}",
                op.name(),
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(match op {
        OpKind::Second => dt.second() as i64,
        OpKind::Minute => dt.minute() as i64,
        OpKind::Hour => dt.hour() as i64,
        OpKind::DayOfYear => dt.ordinal() as i64,
        OpKind::DayOfMonth => dt.day() as i64,
        // 1 = Sunday .. 7 = Saturday
        OpKind::DayOfWeek => dt.weekday().num_days_from_sunday() as i64 + 1,
        OpKind::Month => dt.month() as i64,
        OpKind::Year => dt.year() as i64,
        // strftime %U: zero-based week counting from the first Sunday.
        // week = (yday0 - wday0 + 7) / 7 with both terms zero-based.
        OpKind::Week => {
            let yday0 = dt.ordinal0() as i64;
            let wday0 = dt.weekday().num_days_from_sunday() as i64;
            (yday0 - wday0 + 7) / 7
        }
        _ => unreachable!("non-date operator"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(json: Json) -> Document {
        Document::from_json(&json).unwrap()
    }

    fn eval(expr_json: Json, doc_json: Json) -> Result<Value> {
        Expression::from_json(&expr_json)?.evaluate(&doc(doc_json))
    }

    // ========== parsing ==========

    #[test]
    fn test_parse_field_reference() {
        let expr = Expression::from_json(&json!("$other.foo")).unwrap();
        assert!(matches!(expr, Expression::FieldPath(ref p) if p == "other.foo"));
    }

    #[test]
    fn test_parse_plain_string_is_literal() {
        let expr = Expression::from_json(&json!("authors")).unwrap();
        assert!(matches!(expr, Expression::Literal(Value::String(ref s)) if s == "authors"));
    }

    #[test]
    fn test_parse_empty_field_reference_fails() {
        assert!(Expression::from_json(&json!("$")).is_err());
    }

    #[test]
    fn test_parse_unknown_operator() {
        let err = Expression::from_json(&json!({"$frobnicate": 1})).unwrap_err();
        assert!(matches!(err, AnvilError::UnknownOperator(_)));
    }

    #[test]
    fn test_parse_arity_mismatch() {
        assert!(Expression::from_json(&json!({"$divide": [1]})).is_err());
        assert!(Expression::from_json(&json!({"$cond": [true, 1]})).is_err());
        assert!(Expression::from_json(&json!({"$not": [1, 2]})).is_err());
    }

    #[test]
    fn test_parse_mixed_operator_and_field_keys_fails() {
        assert!(Expression::from_json(&json!({"$add": [1], "x": 1})).is_err());
    }

    // ========== arithmetic ==========

    #[test]
    fn test_add_integers_stays_int() {
        // p20: all_numbers
        let v = eval(json!({"$add": [1, "$x", 2, "$x"]}), json!({"x": 17})).unwrap();
        assert_eq!(v, Value::Int(37));
    }

    #[test]
    fn test_add_mixed_promotes_to_double() {
        let v = eval(json!({"$add": [1, 2.5]}), json!({})).unwrap();
        assert_eq!(v, Value::Double(3.5));
    }

    #[test]
    fn test_add_overflow_promotes_to_double() {
        // at this magnitude one f64 ulp is 1024, so only the type change and
        // the rounded magnitude are observable
        let v = eval(json!({"$add": [i64::MAX, 1]}), json!({})).unwrap();
        assert!(matches!(v, Value::Double(d) if d >= i64::MAX as f64));
    }

    #[test]
    fn test_add_date_plus_millis() {
        let base = Utc.with_ymd_and_hms(2004, 3, 21, 18, 59, 54).unwrap();
        let mut d = Document::new();
        d.insert("posted", Value::Date(base));
        let expr = Expression::from_json(&json!({"$add": ["$posted", 6000]})).unwrap();
        assert_eq!(
            expr.evaluate(&d).unwrap(),
            Value::Date(Utc.with_ymd_and_hms(2004, 3, 21, 19, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_add_two_dates_fails() {
        let base = Utc.with_ymd_and_hms(2004, 3, 21, 18, 59, 54).unwrap();
        let mut d = Document::new();
        d.insert("posted", Value::Date(base));
        let expr = Expression::from_json(&json!({"$add": ["$posted", "$posted"]})).unwrap();
        assert!(matches!(
            expr.evaluate(&d),
            Err(AnvilError::ExpressionType(_))
        ));
    }

    #[test]
    fn test_add_string_is_type_error() {
        let err = eval(json!({"$add": [1, "nope"]}), json!({})).unwrap_err();
        assert!(matches!(err, AnvilError::ExpressionType(_)));
    }

    #[test]
    fn test_add_missing_propagates() {
        let v = eval(json!({"$add": [1, "$absent"]}), json!({})).unwrap();
        assert!(v.is_missing());
    }

    #[test]
    fn test_subtract() {
        // p13: 5 - 5 = 0, 7 - 14 = -7
        assert_eq!(
            eval(json!({"$subtract": ["$a", "$b"]}), json!({"a": 7, "b": 14})).unwrap(),
            Value::Int(-7)
        );
    }

    #[test]
    fn test_multiply() {
        // p12: 5 * 5 = 25
        assert_eq!(
            eval(json!({"$multiply": ["$a", "$b"]}), json!({"a": 5, "b": 5})).unwrap(),
            Value::Int(25)
        );
    }

    #[test]
    fn test_divide_always_double() {
        assert_eq!(
            eval(json!({"$divide": [13, 2]}), json!({})).unwrap(),
            Value::Double(6.5)
        );
        assert_eq!(
            eval(json!({"$divide": [5, 1]}), json!({})).unwrap(),
            Value::Double(5.0)
        );
    }

    #[test]
    fn test_divide_by_zero() {
        let err = eval(json!({"$divide": [1, 0]}), json!({})).unwrap_err();
        assert!(matches!(err, AnvilError::Arithmetic(_)));
    }

    #[test]
    fn test_mod() {
        // p14: 14 % 6 = 2
        assert_eq!(
            eval(json!({"$mod": [14, 6]}), json!({})).unwrap(),
            Value::Int(2)
        );
        let err = eval(json!({"$mod": [1, 0]}), json!({})).unwrap_err();
        assert!(matches!(err, AnvilError::Arithmetic(_)));
    }

    // ========== $concat (the p20 matrix) ==========

    #[test]
    fn test_concat_coerces_numbers() {
        let d = json!({"x": 17, "y": "foo"});
        assert_eq!(
            eval(json!({"$concat": [3, "$y", 4, "$y"]}), d.clone()).unwrap(),
            Value::from("3foo4foo")
        );
        assert_eq!(
            eval(json!({"$concat": ["a", "$x", "b", "$x"]}), d.clone()).unwrap(),
            Value::from("a17b17")
        );
        assert_eq!(
            eval(json!({"$concat": ["c", "$y", "d", "$y"]}), d.clone()).unwrap(),
            Value::from("cfoodfoo")
        );
        assert_eq!(
            eval(json!({"$concat": [5, "$y", "e", "$x"]}), d).unwrap(),
            Value::from("5fooe17")
        );
    }

    #[test]
    fn test_concat_missing_makes_whole_result_missing() {
        let v = eval(json!({"$concat": ["a", "$absent", "b"]}), json!({})).unwrap();
        assert!(v.is_missing());
    }

    #[test]
    fn test_concat_null_yields_null() {
        let v = eval(json!({"$concat": ["a", "$n"]}), json!({"n": null})).unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn test_concat_rejects_bool() {
        assert!(eval(json!({"$concat": ["a", true]}), json!({})).is_err());
    }

    // ========== conditionals ==========

    #[test]
    fn test_ifnull_takes_first_when_present() {
        assert_eq!(
            eval(json!({"$ifNull": ["$a", "$b"]}), json!({"a": 5, "b": 14})).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn test_ifnull_falls_back_on_missing_and_null() {
        assert_eq!(
            eval(json!({"$ifNull": ["$absent", "$b"]}), json!({"b": 14})).unwrap(),
            Value::Int(14)
        );
        assert_eq!(
            eval(json!({"$ifNull": ["$a", "$b"]}), json!({"a": null, "b": 14})).unwrap(),
            Value::Int(14)
        );
    }

    #[test]
    fn test_cond_branches() {
        let spec = json!({"$cond": [{"$eq": ["$author", "dave"]},
                                    {"$add": ["$pageViews", 1000]},
                                    "$pageViews"]});
        assert_eq!(
            eval(spec.clone(), json!({"author": "dave", "pageViews": 7})).unwrap(),
            Value::Int(1007)
        );
        assert_eq!(
            eval(spec, json!({"author": "bob", "pageViews": 5})).unwrap(),
            Value::Int(5)
        );
    }

    // ========== comparison & boolean ==========

    #[test]
    fn test_eq_on_field() {
        assert_eq!(
            eval(json!({"$eq": ["$author", "dave"]}), json!({"author": "dave"})).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval(json!({"$eq": ["$author", "dave"]}), json!({"author": "bob"})).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_cmp_cross_type_uses_type_order() {
        // numbers sort before strings
        assert_eq!(
            eval(json!({"$cmp": [99, "a"]}), json!({})).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_or_and_not() {
        let d = json!({"author": "bob", "tags": "good"});
        let spec = json!({"$or": [{"$eq": ["$author", "dave"]},
                                  {"$eq": ["$tags", "good"]}]});
        assert_eq!(eval(spec, d.clone()).unwrap(), Value::Bool(true));
        assert_eq!(
            eval(json!({"$and": [{"$eq": ["$author", "bob"]}, false]}), d.clone()).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(eval(json!({"$not": [0]}), d).unwrap(), Value::Bool(true));
    }

    // ========== strings ==========

    #[test]
    fn test_to_upper_lower() {
        assert_eq!(
            eval(json!({"$toUpper": "$author"}), json!({"author": "bob"})).unwrap(),
            Value::from("BOB")
        );
        assert_eq!(
            eval(json!({"$toLower": "BOB"}), json!({})).unwrap(),
            Value::from("bob")
        );
        // missing propagates
        assert!(eval(json!({"$toUpper": "$absent"}), json!({}))
            .unwrap()
            .is_missing());
    }

    #[test]
    fn test_substr() {
        assert_eq!(
            eval(json!({"$substr": ["$author", 1, 2]}), json!({"author": "bob"})).unwrap(),
            Value::from("ob")
        );
        // negative length means "to the end"
        assert_eq!(
            eval(json!({"$substr": ["abcdef", 2, -1]}), json!({})).unwrap(),
            Value::from("cdef")
        );
        // past the end
        assert_eq!(
            eval(json!({"$substr": ["abc", 10, 2]}), json!({})).unwrap(),
            Value::from("")
        );
    }

    #[test]
    fn test_strcasecmp() {
        assert_eq!(
            eval(json!({"$strcasecmp": ["foo", "bar"]}), json!({})).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            eval(json!({"$strcasecmp": ["foo", "FOO"]}), json!({})).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            eval(json!({"$strcasecmp": ["bar", "foo"]}), json!({})).unwrap(),
            Value::Int(-1)
        );
    }

    // ========== dates ==========

    fn date_doc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Document {
        let mut doc = Document::new();
        doc.insert(
            "posted",
            Value::Date(Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()),
        );
        doc
    }

    fn date_part(op: &str, doc: &Document) -> i64 {
        let expr =
            Expression::from_json(&json!({ op: "$posted" })).unwrap();
        match expr.evaluate(doc).unwrap() {
            Value::Int(n) => n,
            other => panic!("expected int, got {:?}", other),
        }
    }

    #[test]
    fn test_date_parts_march_2004() {
        let d = date_doc(2004, 3, 21, 18, 59, 54);
        assert_eq!(date_part("$second", &d), 54);
        assert_eq!(date_part("$minute", &d), 59);
        assert_eq!(date_part("$hour", &d), 18);
        assert_eq!(date_part("$dayOfYear", &d), 81);
        assert_eq!(date_part("$dayOfMonth", &d), 21);
        assert_eq!(date_part("$dayOfWeek", &d), 1); // Sunday
        assert_eq!(date_part("$month", &d), 3);
        assert_eq!(date_part("$year", &d), 2004);
    }

    // The week-numbering convention (strftime %U) is pinned by these three
    // cases before anything else depends on it.
    #[test]
    fn test_week_numbering_convention() {
        assert_eq!(date_part("$week", &date_doc(2004, 3, 21, 18, 59, 54)), 12);
        assert_eq!(date_part("$week", &date_doc(2030, 8, 8, 4, 11, 10)), 31);
        assert_eq!(date_part("$week", &date_doc(2000, 12, 31, 5, 17, 14)), 53);
        // January 1st before the first Sunday is week 0
        assert_eq!(date_part("$week", &date_doc(2001, 1, 1, 0, 0, 0)), 0);
    }

    #[test]
    fn test_date_part_on_non_date_fails() {
        let err = eval(json!({"$year": "$x"}), json!({"x": 5})).unwrap_err();
        assert!(matches!(err, AnvilError::ExpressionType(_)));
    }

    #[test]
    fn test_date_part_missing_propagates() {
        assert!(eval(json!({"$year": "$absent"}), json!({}))
            .unwrap()
            .is_missing());
    }

    // ========== object constructor ==========

    #[test]
    fn test_object_constructor() {
        let v = eval(
            json!({"foo": "$pageViews", "bar": "$tags"}),
            json!({"pageViews": 5, "tags": "fun"}),
        )
        .unwrap();
        assert_eq!(v.to_json(), json!({"foo": 5, "bar": "fun"}));
    }

    #[test]
    fn test_object_constructor_omits_missing_fields() {
        let v = eval(
            json!({"foo": "$absent", "bar": "$tags"}),
            json!({"tags": "fun"}),
        )
        .unwrap();
        assert_eq!(v.to_json(), json!({"bar": "fun"}));
    }
}
