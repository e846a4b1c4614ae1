//! Filter tree and parsing of match descriptors
//!
//! A filter document is a conjunction of clauses. Each clause is either a
//! logical operator (`$and`, `$or`, `$nor`), `$expr`, `$text`, or a field
//! predicate `{path: value}` / `{path: {$op: operand, ...}}`.

use regex::{Regex, RegexBuilder};

use crate::errors::{AggError, AggResult};
use crate::expr::{is_truthy, Expression};
use crate::value::{Document, FieldPath, Value, ValueKind};

use super::geo::{Geometry, Shape};
use super::text::TextQuery;

/// `$type` operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSpec {
    Kind(ValueKind),
    /// Alias matching every numeric kind
    Number,
}

impl TypeSpec {
    fn parse(value: &Value) -> AggResult<TypeSpec> {
        let spec = match value {
            Value::String(s) if s == "number" => Some(TypeSpec::Number),
            Value::String(s) => ValueKind::from_name(s).map(TypeSpec::Kind),
            other => other
                .as_i64()
                .and_then(ValueKind::from_code)
                .map(TypeSpec::Kind),
        };
        spec.ok_or_else(|| AggError::invalid_stage(format!("$type: unknown type {}", value)))
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            TypeSpec::Number => value.is_number(),
            TypeSpec::Kind(kind) => value.kind() == *kind,
        }
    }
}

/// Compiled `$regex` with its `$options`
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    pub pattern: String,
    pub options: String,
    regex: Regex,
}

impl RegexMatcher {
    pub fn new(pattern: &str, options: &str) -> AggResult<Self> {
        let mut builder = RegexBuilder::new(pattern);
        for flag in options.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(AggError::invalid_stage(format!(
                        "$options: unsupported flag '{}'",
                        other
                    )))
                }
            };
        }
        let regex = builder
            .build()
            .map_err(|e| AggError::invalid_stage(format!("$regex: {}", e)))?;
        Ok(Self {
            pattern: pattern.to_string(),
            options: options.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// `$elemMatch` operand
#[derive(Debug, Clone)]
pub enum ElemMatch {
    /// Operators applied to the element itself: `{$gte: 80, $lt: 85}`
    Conditions(Vec<Condition>),
    /// A filter applied to document elements: `{title: "Sports"}`
    Filter(Box<Filter>),
}

/// One predicate on the values found at a field path
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Type(Vec<TypeSpec>),
    Regex(RegexMatcher),
    Not(Vec<Condition>),
    All(Vec<Value>),
    ElemMatch(ElemMatch),
    Size(i64),
    GeoWithin(Shape),
    GeoIntersects(Geometry),
}

/// A parsed filter
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field {
        path: FieldPath,
        conditions: Vec<Condition>,
    },
    Expr(Expression),
    Text(TextQuery),
}

impl Filter {
    /// Filter matching every document
    pub fn match_all() -> Filter {
        Filter::And(Vec::new())
    }

    /// Parse a filter document; `$text` is accepted at the top level only
    pub fn parse(doc: &Document) -> AggResult<Filter> {
        parse_clauses(doc, true)
    }

    /// Parse a filter value that must be a document
    pub fn parse_value(value: &Value) -> AggResult<Filter> {
        match value {
            Value::Document(doc) => Filter::parse(doc),
            other => Err(AggError::invalid_stage(format!(
                "filter must be an object, found {}",
                other.kind()
            ))),
        }
    }

    /// Top-level conjuncts
    pub fn conjuncts(&self) -> Vec<&Filter> {
        match self {
            Filter::And(items) => items.iter().flat_map(Filter::conjuncts).collect(),
            other => vec![other],
        }
    }

    /// Whether a `$text` clause appears anywhere in the filter
    pub fn contains_text(&self) -> bool {
        match self {
            Filter::Text(_) => true,
            Filter::And(items) | Filter::Or(items) | Filter::Nor(items) => {
                items.iter().any(Filter::contains_text)
            }
            _ => false,
        }
    }

    /// Split a top-level `$text` clause from the remaining predicate
    pub fn split_text(&self) -> (Option<TextQuery>, Filter) {
        let mut text = None;
        let mut rest = Vec::new();
        for clause in self.conjuncts() {
            match clause {
                Filter::Text(q) if text.is_none() => text = Some(q.clone()),
                other => rest.push(other.clone()),
            }
        }
        let residual = if rest.len() == 1 {
            rest.remove(0)
        } else {
            Filter::And(rest)
        };
        (text, residual)
    }

    /// Whether any field predicate addresses `path` or a path below it
    pub fn references(&self, path: &FieldPath) -> bool {
        match self {
            Filter::Field { path: p, .. } => p.starts_with(path),
            Filter::And(items) | Filter::Or(items) | Filter::Nor(items) => {
                items.iter().any(|f| f.references(path))
            }
            _ => false,
        }
    }

    /// Conjuncts addressing `path` or a path below it
    pub fn clauses_on(&self, path: &FieldPath) -> Vec<Filter> {
        self.conjuncts()
            .into_iter()
            .filter(|clause| clause.references(path))
            .cloned()
            .collect()
    }
}

fn parse_clauses(doc: &Document, top_level: bool) -> AggResult<Filter> {
    let mut clauses = Vec::with_capacity(doc.len());
    for (key, value) in doc.iter() {
        let clause = match key.as_str() {
            "$and" | "$or" | "$nor" => {
                let items = value
                    .as_array()
                    .filter(|items| !items.is_empty())
                    .ok_or_else(|| {
                        AggError::invalid_stage(format!("{} expects a non-empty array", key))
                    })?;
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    let sub = item.as_document().ok_or_else(|| {
                        AggError::invalid_stage(format!("{} entries must be objects", key))
                    })?;
                    parsed.push(parse_clauses(sub, false)?);
                }
                match key.as_str() {
                    "$and" => Filter::And(parsed),
                    "$or" => Filter::Or(parsed),
                    _ => Filter::Nor(parsed),
                }
            }
            "$expr" => Filter::Expr(Expression::parse(value)?),
            "$text" => {
                if !top_level {
                    return Err(AggError::invalid_stage(
                        "$text is only allowed at the top level of a filter",
                    ));
                }
                if clauses.iter().any(|c| matches!(c, Filter::Text(_))) {
                    return Err(AggError::invalid_stage("only one $text clause is allowed"));
                }
                Filter::Text(TextQuery::parse(value)?)
            }
            "$comment" => continue,
            other if other.starts_with('$') => {
                return Err(AggError::invalid_stage(format!(
                    "unknown top level operator '{}'",
                    other
                )))
            }
            field => Filter::Field {
                path: FieldPath::parse(field)?,
                conditions: parse_field_value(value)?,
            },
        };
        clauses.push(clause);
    }
    Ok(if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Filter::And(clauses)
    })
}

fn is_operator_document(value: &Value) -> bool {
    matches!(value, Value::Document(doc) if doc.keys().next().map_or(false, |k| k.starts_with('$')))
}

fn parse_field_value(value: &Value) -> AggResult<Vec<Condition>> {
    match value {
        Value::Document(doc) if is_operator_document(value) => parse_operators(doc),
        other => Ok(vec![Condition::Eq(other.clone())]),
    }
}

fn array_operand<'a>(op: &str, value: &'a Value) -> AggResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| AggError::invalid_stage(format!("{} expects an array", op)))
}

/// Parse an operator document such as `{$gt: 1, $lt: 5}`
pub(crate) fn parse_operators(doc: &Document) -> AggResult<Vec<Condition>> {
    let mut conditions = Vec::with_capacity(doc.len());
    let options = doc.get("$options");
    if options.is_some() && !doc.contains_key("$regex") {
        return Err(AggError::invalid_stage("$options requires $regex"));
    }

    for (key, operand) in doc.iter() {
        let condition = match key.as_str() {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(array_operand("$in", operand)?.clone()),
            "$nin" => Condition::Nin(array_operand("$nin", operand)?.clone()),
            "$exists" => Condition::Exists(is_truthy(operand)),
            "$type" => {
                let specs = match operand {
                    Value::Array(items) => items
                        .iter()
                        .map(TypeSpec::parse)
                        .collect::<AggResult<Vec<_>>>()?,
                    single => vec![TypeSpec::parse(single)?],
                };
                Condition::Type(specs)
            }
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| AggError::invalid_stage("$regex expects a string"))?;
                let flags = match options {
                    Some(Value::String(s)) => s.as_str(),
                    Some(_) => return Err(AggError::invalid_stage("$options expects a string")),
                    None => "",
                };
                Condition::Regex(RegexMatcher::new(pattern, flags)?)
            }
            "$options" => continue,
            "$not" => match operand {
                Value::Document(inner) if is_operator_document(operand) => {
                    Condition::Not(parse_operators(inner)?)
                }
                _ => {
                    return Err(AggError::invalid_stage(
                        "$not expects an operator expression",
                    ))
                }
            },
            "$all" => Condition::All(array_operand("$all", operand)?.clone()),
            "$elemMatch" => Condition::ElemMatch(parse_elem_match(operand)?),
            "$size" => {
                let n = operand
                    .as_i64()
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| AggError::invalid_stage("$size expects a non-negative integer"))?;
                Condition::Size(n)
            }
            "$geoWithin" => Condition::GeoWithin(Shape::parse(operand)?),
            "$geoIntersects" => {
                let geometry = operand
                    .as_document()
                    .and_then(|d| d.get("$geometry"))
                    .ok_or_else(|| AggError::invalid_stage("$geoIntersects expects {$geometry}"))?;
                Condition::GeoIntersects(Geometry::parse(geometry)?)
            }
            "$near" | "$nearSphere" => {
                return Err(AggError::invalid_stage(format!(
                    "{} is not supported in $match; use the $geoNear stage",
                    key
                )))
            }
            other if other.starts_with('$') => {
                return Err(AggError::invalid_stage(format!(
                    "unknown operator '{}'",
                    other
                )))
            }
            other => {
                return Err(AggError::invalid_stage(format!(
                    "cannot mix operators and field '{}' in one predicate",
                    other
                )))
            }
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

/// Parse an `$elemMatch` operand (shared with `$elemMatch` projections)
pub(crate) fn parse_elem_match(operand: &Value) -> AggResult<ElemMatch> {
    let doc = operand
        .as_document()
        .ok_or_else(|| AggError::invalid_stage("$elemMatch expects an object"))?;
    let logical = ["$and", "$or", "$nor", "$expr"];
    let operator_form = !doc.is_empty()
        && doc
            .keys()
            .all(|k| k.starts_with('$') && !logical.contains(&k.as_str()));
    if operator_form {
        Ok(ElemMatch::Conditions(parse_operators(doc)?))
    } else {
        Ok(ElemMatch::Filter(Box::new(parse_clauses(doc, false)?)))
    }
}
