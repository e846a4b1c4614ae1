//! Expression evaluation
//!
//! Evaluation is pure: the same expression over the same document and
//! metadata always produces the same value. Errors carry per-document
//! severity so pipeline stages can skip the offending document.

use std::cmp::Ordering;

use crate::errors::{AggError, AggResult, ErrorCode};
use crate::value::{compare, equal, path, Document, Number, Value};

use super::arithmetic;
use super::arrays;
use super::ast::{Expression, MetaField, Operator};
use super::conversion::convert;
use super::dates;
use super::strings;

/// Row metadata produced by `$text` and `$geoNear`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metadata {
    pub text_score: Option<f64>,
    pub geo_distance: Option<f64>,
}

/// Truthiness: false, null, missing and numeric zero are falsy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Missing | Value::Null => false,
        Value::Boolean(b) => *b,
        other => match Number::from_value(other) {
            Some(n) => !n.is_zero(),
            None => true,
        },
    }
}

/// Evaluate `expr` against `doc` without row metadata
pub fn evaluate(expr: &Expression, doc: &Document) -> AggResult<Value> {
    Evaluator::new(doc).evaluate(expr)
}

/// Variables bound by `$filter`
enum Scope<'s> {
    Empty,
    Bound {
        name: &'s str,
        value: &'s Value,
        parent: &'s Scope<'s>,
    },
}

impl<'s> Scope<'s> {
    fn lookup(&self, name: &str) -> Option<&'s Value> {
        match self {
            Scope::Empty => None,
            Scope::Bound {
                name: bound,
                value,
                parent,
            } => {
                if *bound == name {
                    Some(*value)
                } else {
                    parent.lookup(name)
                }
            }
        }
    }
}

/// Evaluates expressions against one root document
pub struct Evaluator<'a> {
    root: &'a Document,
    meta: Metadata,
}

impl<'a> Evaluator<'a> {
    pub fn new(root: &'a Document) -> Self {
        Self {
            root,
            meta: Metadata::default(),
        }
    }

    pub fn with_meta(root: &'a Document, meta: Metadata) -> Self {
        Self { root, meta }
    }

    pub fn evaluate(&self, expr: &Expression) -> AggResult<Value> {
        self.eval(expr, &Scope::Empty)
    }

    fn eval(&self, expr: &Expression, scope: &Scope<'_>) -> AggResult<Value> {
        match expr {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Field(p) => Ok(path::resolve(self.root, p)),
            Expression::Variable { name, path: sub } => {
                let bound = scope.lookup(name);
                match (bound, sub) {
                    (Some(value), Some(p)) => Ok(path::resolve_value(value, p.segments())),
                    (Some(value), None) => Ok(value.clone()),
                    (None, Some(p)) => Ok(path::resolve(self.root, p)),
                    (None, None) => Ok(Value::Document(self.root.clone())),
                }
            }
            Expression::Array(items) => items
                .iter()
                .map(|item| self.eval(item, scope))
                .map(|r| r.map(|v| if v.is_missing() { Value::Null } else { v }))
                .collect::<AggResult<Vec<_>>>()
                .map(Value::Array),
            Expression::Object(fields) => {
                let mut doc = Document::with_capacity(fields.len());
                for (key, field) in fields {
                    doc.insert(key.clone(), self.eval(field, scope)?);
                }
                Ok(Value::Document(doc))
            }
            Expression::Call(op, args) => self.call(*op, args, scope),
            Expression::Cond {
                test,
                then,
                otherwise,
            } => {
                if is_truthy(&self.eval(test, scope)?) {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expression::Convert {
                input,
                to,
                on_error,
                on_null,
            } => {
                let value = self.eval(input, scope)?;
                if value.is_nullish() {
                    return match on_null {
                        Some(e) => self.eval(e, scope),
                        None => Ok(Value::Null),
                    };
                }
                match convert(&value, *to) {
                    Ok(v) => Ok(v),
                    Err(err) if err.code() == ErrorCode::ConversionFailed => match on_error {
                        Some(e) => self.eval(e, scope),
                        None => Err(err),
                    },
                    Err(err) => Err(err),
                }
            }
            Expression::Filter {
                input,
                binding,
                cond,
            } => {
                let value = self.eval(input, scope)?;
                let items = match value {
                    Value::Null | Value::Missing => return Ok(Value::Null),
                    Value::Array(items) => items,
                    other => {
                        return Err(AggError::type_mismatch(format!(
                            "$filter requires an array input, found {}",
                            other.kind()
                        )))
                    }
                };
                let mut kept = Vec::new();
                for item in items {
                    let inner = Scope::Bound {
                        name: binding,
                        value: &item,
                        parent: scope,
                    };
                    let keep = is_truthy(&self.eval(cond, &inner)?);
                    if keep {
                        kept.push(item);
                    }
                }
                Ok(Value::Array(kept))
            }
            Expression::Trim { side, input, chars } => {
                let input = self.eval(input, scope)?;
                let chars = match chars {
                    Some(c) => Some(self.eval(c, scope)?),
                    None => None,
                };
                strings::trim(*side, &input, chars.as_ref())
            }
            Expression::DatePart { part, date } => {
                dates::extract(*part, &self.eval(date, scope)?)
            }
            Expression::Meta(field) => {
                let v = match field {
                    MetaField::TextScore => self.meta.text_score,
                    MetaField::GeoNearDistance => self.meta.geo_distance,
                };
                Ok(v.map(Value::Double).unwrap_or(Value::Missing))
            }
        }
    }

    fn call(&self, op: Operator, args: &[Expression], scope: &Scope<'_>) -> AggResult<Value> {
        match op {
            Operator::And => {
                for arg in args {
                    if !is_truthy(&self.eval(arg, scope)?) {
                        return Ok(Value::Boolean(false));
                    }
                }
                return Ok(Value::Boolean(true));
            }
            Operator::Or => {
                for arg in args {
                    if is_truthy(&self.eval(arg, scope)?) {
                        return Ok(Value::Boolean(true));
                    }
                }
                return Ok(Value::Boolean(false));
            }
            Operator::IfNull => {
                let (replacement, candidates) = match args.split_last() {
                    Some(split) => split,
                    None => return Ok(Value::Null),
                };
                for candidate in candidates {
                    let value = self.eval(candidate, scope)?;
                    if !value.is_nullish() {
                        return Ok(value);
                    }
                }
                return self.eval(replacement, scope);
            }
            _ => {}
        }

        let values = args
            .iter()
            .map(|arg| self.eval(arg, scope))
            .collect::<AggResult<Vec<_>>>()?;

        let result = match op {
            Operator::Concat => strings::concat(&values),
            Operator::ToUpper => strings::to_upper(&values[0]),
            Operator::ToLower => strings::to_lower(&values[0]),
            Operator::SubstrCP => strings::substr_cp(&values[0], &values[1], &values[2]),
            Operator::StrLenCP => strings::str_len_cp(&values[0]),
            Operator::Add => arithmetic::add(&values),
            Operator::Subtract => arithmetic::subtract(&values[0], &values[1]),
            Operator::Multiply => arithmetic::multiply(&values),
            Operator::Divide => arithmetic::divide(&values[0], &values[1]),
            Operator::Mod => arithmetic::modulo(&values[0], &values[1]),
            Operator::Abs => arithmetic::abs(&values[0]),
            Operator::Eq => Ok(Value::Boolean(equal(&values[0], &values[1]))),
            Operator::Ne => Ok(Value::Boolean(!equal(&values[0], &values[1]))),
            Operator::Gt => Ok(Value::Boolean(
                compare(&values[0], &values[1]) == Ordering::Greater,
            )),
            Operator::Gte => Ok(Value::Boolean(
                compare(&values[0], &values[1]) != Ordering::Less,
            )),
            Operator::Lt => Ok(Value::Boolean(
                compare(&values[0], &values[1]) == Ordering::Less,
            )),
            Operator::Lte => Ok(Value::Boolean(
                compare(&values[0], &values[1]) != Ordering::Greater,
            )),
            Operator::Cmp => Ok(Value::Int32(match compare(&values[0], &values[1]) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            })),
            Operator::Not => Ok(Value::Boolean(!is_truthy(&values[0]))),
            Operator::Size => arrays::size(&values[0]),
            Operator::Slice => arrays::slice(&values),
            Operator::ArrayElemAt => arrays::array_elem_at(&values[0], &values[1]),
            Operator::In => arrays::contains(&values[0], &values[1]),
            Operator::IsArray => Ok(arrays::is_array(&values[0])),
            Operator::And | Operator::Or | Operator::IfNull => Ok(Value::Null),
        };
        result.map_err(|err| {
            if err.message().starts_with(op.name()) {
                err
            } else {
                err.context(op.name())
            }
        })
    }
}
