// src/aggregation/accumulators.rs
//! Accumulator implementations for the $group stage.
//!
//! Each accumulator is a small state machine fed one value per input
//! document (the result of evaluating its argument expression) and asked
//! for its final value once the group is complete. New accumulators plug in
//! through `create_accumulator` without touching the grouping loop.

use crate::error::{AnvilError, Result};
use crate::value::Value;

/// Streaming aggregate over the values of one group.
pub trait Accumulator {
    /// Fold one evaluated argument into the running state.
    fn accumulate(&mut self, value: Value);

    /// Produce the final value. A missing result means the output field
    /// is omitted from the group document.
    fn finalize(&mut self) -> Value;
}

/// Instantiate a fresh accumulator by operator name.
pub fn create_accumulator(name: &str) -> Result<Box<dyn Accumulator>> {
    Ok(match name {
        "$sum" => Box::new(SumAccumulator::default()),
        "$avg" => Box::new(AvgAccumulator::default()),
        "$min" => Box::new(ExtremumAccumulator::min()),
        "$max" => Box::new(ExtremumAccumulator::max()),
        "$first" => Box::new(FirstAccumulator::default()),
        "$last" => Box::new(LastAccumulator::default()),
        "$push" => Box::new(PushAccumulator::default()),
        "$addToSet" => Box::new(AddToSetAccumulator::default()),
        _ => return Err(AnvilError::UnknownOperator(name.to_string())),
    })
}

/// $sum: adds numeric inputs, ignoring everything else. Stays an integer
/// until a double appears or the integer total overflows. An empty group
/// sums to integer zero.
#[derive(Default)]
pub struct SumAccumulator {
    int_total: i64,
    double_total: f64,
    is_double: bool,
}

impl Accumulator for SumAccumulator {
    fn accumulate(&mut self, value: Value) {
        match value {
            Value::Int(n) => match self.int_total.checked_add(n) {
                Some(total) => self.int_total = total,
                None => {
                    self.is_double = true;
                    self.double_total += self.int_total as f64 + n as f64;
                    self.int_total = 0;
                }
            },
            Value::Double(d) => {
                self.is_double = true;
                self.double_total += d;
            }
            // non-numeric inputs are ignored
            _ => {}
        }
    }

    fn finalize(&mut self) -> Value {
        if self.is_double {
            Value::Double(self.double_total + self.int_total as f64)
        } else {
            Value::Int(self.int_total)
        }
    }
}

/// $avg: arithmetic mean of the numeric inputs, always a double.
/// Null when the group had no numeric values.
#[derive(Default)]
pub struct AvgAccumulator {
    total: f64,
    count: u64,
}

impl Accumulator for AvgAccumulator {
    fn accumulate(&mut self, value: Value) {
        if let Some(n) = value.as_f64() {
            self.total += n;
            self.count += 1;
        }
    }

    fn finalize(&mut self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Double(self.total / self.count as f64)
        }
    }
}

/// $min / $max: extremum under the canonical value ordering, ignoring
/// null and missing inputs. Null when the group had nothing comparable.
pub struct ExtremumAccumulator {
    want_max: bool,
    best: Option<Value>,
}

impl ExtremumAccumulator {
    fn min() -> Self {
        ExtremumAccumulator {
            want_max: false,
            best: None,
        }
    }

    fn max() -> Self {
        ExtremumAccumulator {
            want_max: true,
            best: None,
        }
    }
}

impl Accumulator for ExtremumAccumulator {
    fn accumulate(&mut self, value: Value) {
        if value.is_nullish() {
            return;
        }
        let replace = match &self.best {
            None => true,
            Some(best) => {
                let ord = value.compare(best);
                if self.want_max {
                    ord == std::cmp::Ordering::Greater
                } else {
                    ord == std::cmp::Ordering::Less
                }
            }
        };
        if replace {
            self.best = Some(value);
        }
    }

    fn finalize(&mut self) -> Value {
        self.best.take().unwrap_or(Value::Null)
    }
}

/// $first: the argument value from the first document of the group.
/// A missing first value stays missing, which omits the output field.
#[derive(Default)]
pub struct FirstAccumulator {
    first: Option<Value>,
}

impl Accumulator for FirstAccumulator {
    fn accumulate(&mut self, value: Value) {
        if self.first.is_none() {
            self.first = Some(value);
        }
    }

    fn finalize(&mut self) -> Value {
        self.first.take().unwrap_or(Value::Missing)
    }
}

/// $last: the argument value from the final document of the group.
#[derive(Default)]
pub struct LastAccumulator {
    last: Option<Value>,
}

impl Accumulator for LastAccumulator {
    fn accumulate(&mut self, value: Value) {
        self.last = Some(value);
    }

    fn finalize(&mut self) -> Value {
        self.last.take().unwrap_or(Value::Missing)
    }
}

/// $push: every non-missing input, in encounter order.
#[derive(Default)]
pub struct PushAccumulator {
    items: Vec<Value>,
}

impl Accumulator for PushAccumulator {
    fn accumulate(&mut self, value: Value) {
        if !value.is_missing() {
            self.items.push(value);
        }
    }

    fn finalize(&mut self) -> Value {
        Value::Array(std::mem::take(&mut self.items))
    }
}

/// $addToSet: distinct non-missing inputs in first-seen order. Linear
/// scan on structural equality; group cardinalities here are small.
#[derive(Default)]
pub struct AddToSetAccumulator {
    items: Vec<Value>,
}

impl Accumulator for AddToSetAccumulator {
    fn accumulate(&mut self, value: Value) {
        if value.is_missing() {
            return;
        }
        if !self.items.iter().any(|existing| *existing == value) {
            self.items.push(value);
        }
    }

    fn finalize(&mut self) -> Value {
        Value::Array(std::mem::take(&mut self.items))
    }
}
