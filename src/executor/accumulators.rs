//! Group accumulators
//!
//! | operator    | result on an empty group | ignores            |
//! |-------------|--------------------------|--------------------|
//! | `$sum`      | 0                        | non-numeric values |
//! | `$avg`      | null                     | non-numeric values |
//! | `$min/$max` | null                     | null and missing   |
//! | `$first`    | null                     |                    |
//! | `$last`     | null                     |                    |
//! | `$push`     | []                       | missing            |
//! | `$addToSet` | []                       | missing            |
//! | `$count`    | 0                        |                    |
//!
//! `$first` and `$last` follow arrival order, which is only meaningful
//! after a `$sort`.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::errors::{AggError, AggResult};
use crate::expr::Expression;
use crate::value::{compare, Document, Number, OrdValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
    Count,
}

impl AccumulatorOp {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "$sum" => AccumulatorOp::Sum,
            "$avg" => AccumulatorOp::Avg,
            "$min" => AccumulatorOp::Min,
            "$max" => AccumulatorOp::Max,
            "$first" => AccumulatorOp::First,
            "$last" => AccumulatorOp::Last,
            "$push" => AccumulatorOp::Push,
            "$addToSet" => AccumulatorOp::AddToSet,
            "$count" => AccumulatorOp::Count,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccumulatorOp::Sum => "$sum",
            AccumulatorOp::Avg => "$avg",
            AccumulatorOp::Min => "$min",
            AccumulatorOp::Max => "$max",
            AccumulatorOp::First => "$first",
            AccumulatorOp::Last => "$last",
            AccumulatorOp::Push => "$push",
            AccumulatorOp::AddToSet => "$addToSet",
            AccumulatorOp::Count => "$count",
        }
    }
}

/// One output field of `$group`, `$bucket` or `$bucketAuto`
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorSpec {
    pub field: String,
    pub op: AccumulatorOp,
    pub expr: Expression,
}

impl AccumulatorSpec {
    /// Parse `field: {$op: expr}`
    pub fn parse(field: &str, value: &Value) -> AggResult<Self> {
        if field.contains('.') || field.starts_with('$') {
            return Err(AggError::invalid_stage(format!(
                "accumulator field name '{}' cannot contain '.' or start with '$'",
                field
            )));
        }
        let (name, operand) = value
            .as_document()
            .and_then(Document::single_entry)
            .ok_or_else(|| {
                AggError::invalid_stage(format!(
                    "field '{}' must be an accumulator object with exactly one operator",
                    field
                ))
            })?;
        let op = AccumulatorOp::parse(name).ok_or_else(|| {
            AggError::invalid_stage(format!("unknown accumulator '{}'", name))
        })?;
        let expr = if op == AccumulatorOp::Count {
            match operand.as_document() {
                Some(args) if args.is_empty() => Expression::Literal(Value::Int32(1)),
                _ => {
                    return Err(AggError::invalid_stage(
                        "$count accumulator takes an empty object",
                    ))
                }
            }
        } else {
            if operand.is_array() {
                return Err(AggError::invalid_stage(format!(
                    "{} is a unary accumulator",
                    name
                )));
            }
            Expression::parse(operand)?
        };
        Ok(Self {
            field: field.to_string(),
            op,
            expr,
        })
    }

    /// Parse every field of an `output` document
    pub fn parse_all(output: &Document) -> AggResult<Vec<Self>> {
        output
            .iter()
            .map(|(field, value)| Self::parse(field, value))
            .collect()
    }

    /// `{count: {$sum: 1}}`
    pub fn default_count() -> Vec<Self> {
        vec![Self {
            field: "count".to_string(),
            op: AccumulatorOp::Sum,
            expr: Expression::Literal(Value::Int32(1)),
        }]
    }
}

/// Running state of one accumulator within one group
#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Number),
    Avg { sum: Number, count: i64 },
    Extreme { want: Ordering, best: Option<Value> },
    First(Option<Value>),
    Last(Value),
    Push(Vec<Value>),
    AddToSet { seen: BTreeSet<OrdValue>, items: Vec<Value> },
    Count(i64),
}

impl Accumulator {
    pub fn new(op: AccumulatorOp) -> Self {
        match op {
            AccumulatorOp::Sum => Accumulator::Sum(Number::Int32(0)),
            AccumulatorOp::Avg => Accumulator::Avg {
                sum: Number::Int32(0),
                count: 0,
            },
            AccumulatorOp::Min => Accumulator::Extreme {
                want: Ordering::Less,
                best: None,
            },
            AccumulatorOp::Max => Accumulator::Extreme {
                want: Ordering::Greater,
                best: None,
            },
            AccumulatorOp::First => Accumulator::First(None),
            AccumulatorOp::Last => Accumulator::Last(Value::Null),
            AccumulatorOp::Push => Accumulator::Push(Vec::new()),
            AccumulatorOp::AddToSet => Accumulator::AddToSet {
                seen: BTreeSet::new(),
                items: Vec::new(),
            },
            AccumulatorOp::Count => Accumulator::Count(0),
        }
    }

    /// The mismatch to report when `value` is left out of a numeric result.
    ///
    /// Null and missing operands are ignored silently, as are the
    /// non-numeric elements of a `$sum` array operand.
    pub fn ignored_operand(&self, value: &Value) -> Option<AggError> {
        let op = match self {
            Accumulator::Sum(_) if !matches!(value, Value::Array(_)) => "$sum",
            Accumulator::Avg { .. } => "$avg",
            _ => return None,
        };
        if value.is_nullish() || Number::from_value(value).is_some() {
            return None;
        }
        Some(AggError::type_mismatch(format!(
            "{} ignored a non-numeric operand of type {}",
            op,
            value.kind()
        )))
    }

    /// Fold one value in; returns the bytes newly retained
    pub fn accumulate(&mut self, value: Value) -> AggResult<usize> {
        match self {
            Accumulator::Sum(total) => {
                if let Some(n) = sum_operand(&value) {
                    *total = total.add(n)?;
                }
                Ok(0)
            }
            Accumulator::Avg { sum, count } => {
                if let Some(n) = Number::from_value(&value) {
                    *sum = sum.add(n)?;
                    *count += 1;
                }
                Ok(0)
            }
            Accumulator::Extreme { want, best } => {
                if value.is_nullish() {
                    return Ok(0);
                }
                let replace = match best {
                    Some(current) => compare(&value, current) == *want,
                    None => true,
                };
                if replace {
                    let size = value.approx_size();
                    *best = Some(value);
                    return Ok(size);
                }
                Ok(0)
            }
            Accumulator::First(first) => {
                if first.is_none() {
                    let size = value.approx_size();
                    *first = Some(value);
                    return Ok(size);
                }
                Ok(0)
            }
            Accumulator::Last(last) => {
                let size = value.approx_size();
                *last = value;
                Ok(size)
            }
            Accumulator::Push(items) => {
                if value.is_missing() {
                    return Ok(0);
                }
                let size = value.approx_size();
                items.push(value);
                Ok(size)
            }
            Accumulator::AddToSet { seen, items } => {
                if value.is_missing() {
                    return Ok(0);
                }
                if seen.insert(OrdValue(value.clone())) {
                    let size = value.approx_size() * 2;
                    items.push(value);
                    return Ok(size);
                }
                Ok(0)
            }
            Accumulator::Count(count) => {
                *count += 1;
                Ok(0)
            }
        }
    }

    pub fn finish(self) -> AggResult<Value> {
        Ok(match self {
            Accumulator::Sum(total) => total.into_value(),
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => sum.div(Number::from_i64(count))?.into_value(),
            Accumulator::Extreme { best, .. } => best.unwrap_or(Value::Null),
            Accumulator::First(first) => match first {
                Some(Value::Missing) | None => Value::Null,
                Some(v) => v,
            },
            Accumulator::Last(Value::Missing) => Value::Null,
            Accumulator::Last(v) => v,
            Accumulator::Push(items) => Value::Array(items),
            Accumulator::AddToSet { items, .. } => Value::Array(items),
            Accumulator::Count(count) => Number::from_i64(count).into_value(),
        })
    }
}

/// `$sum` adds numbers and, for a numeric array operand, its numeric
/// elements
fn sum_operand(value: &Value) -> Option<Number> {
    match value {
        Value::Array(items) => {
            let mut total: Option<Number> = None;
            for n in items.iter().filter_map(Number::from_value) {
                total = Some(match total {
                    Some(t) => t.add(n).ok()?,
                    None => n,
                });
            }
            total
        }
        other => Number::from_value(other),
    }
}
