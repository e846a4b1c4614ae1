//! `$project` and `$addFields`
//!
//! A projection is parsed into a tree keyed by path segment. It runs in
//! one of two modes:
//!
//! - inclusion: the output holds `_id` (unless `_id: 0`), the included
//!   fields in input order, then the computed fields in specification order
//! - exclusion: the output is the input minus the excluded fields
//!
//! `$slice` and `$elemMatch` work in either mode. A positional `field.$`
//! keeps the first array element that satisfies the conditions the nearest
//! preceding `$match` places on that field.

use crate::errors::{AggError, AggResult};
use crate::expr::{is_truthy, slice_window, Evaluator, Expression, Metadata};
use crate::query::{parse_elem_match, ElemMatch, Filter};
use crate::value::path::{lookup, set_path};
use crate::value::{Document, FieldPath, Value};

use super::{BoxedStream, ExecContext, Row, RowStream};

#[derive(Debug, Clone)]
enum Node {
    Include,
    Exclude,
    Computed(Expression),
    Nested(Vec<(String, Node)>),
    Slice { skip: Option<i64>, n: i64 },
    ElemMatch(ElemMatch),
    Positional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Inclusion,
    Exclusion,
}

#[derive(Debug, Clone)]
struct Positional {
    path: FieldPath,
    clauses: Vec<Filter>,
}

impl Positional {
    /// The single-element array to emit, or `None` to omit the field
    fn resolve(&self, doc: &Document) -> AggResult<Option<Value>> {
        let Some(value) = lookup(doc, &self.path) else {
            return Ok(None);
        };
        let Value::Array(items) = value else {
            return Ok(Some(value.clone()));
        };
        for item in items {
            let candidate = Value::Array(vec![item.clone()]);
            let mut probe = doc.clone();
            set_path(&mut probe, &self.path, candidate.clone());
            let mut matched = true;
            for clause in &self.clauses {
                if !clause.matches(&probe)? {
                    matched = false;
                    break;
                }
            }
            if matched {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

/// A parsed `$project` specification
#[derive(Debug, Clone)]
pub struct Projection {
    fields: Vec<(String, Node)>,
    mode: Mode,
    positional: Option<Positional>,
}

fn collision(path: &str) -> AggError {
    AggError::invalid_stage(format!("projection path collision at '{}'", path))
}

fn insert_node(
    fields: &mut Vec<(String, Node)>,
    segments: &[String],
    node: Node,
    full: &str,
) -> AggResult<()> {
    let head = &segments[0];
    let existing = fields.iter().position(|(k, _)| k == head);
    if segments.len() == 1 {
        if existing.is_some() {
            return Err(collision(full));
        }
        fields.push((head.clone(), node));
        return Ok(());
    }
    match existing {
        Some(i) => match &mut fields[i].1 {
            Node::Nested(children) => insert_node(children, &segments[1..], node, full),
            _ => Err(collision(full)),
        },
        None => {
            let mut children = Vec::new();
            insert_node(&mut children, &segments[1..], node, full)?;
            fields.push((head.clone(), Node::Nested(children)));
            Ok(())
        }
    }
}

fn parse_slice(operand: &Value) -> AggResult<Node> {
    let integral = |v: &Value| {
        v.as_i64()
            .ok_or_else(|| AggError::invalid_stage("$slice projection expects integers"))
    };
    match operand {
        Value::Array(items) => {
            let skip = integral(&items[0])?;
            let n = integral(&items[1])?;
            if n <= 0 {
                return Err(AggError::invalid_stage(
                    "$slice projection limit must be positive",
                ));
            }
            Ok(Node::Slice {
                skip: Some(skip),
                n,
            })
        }
        other => Ok(Node::Slice {
            skip: None,
            n: integral(other)?,
        }),
    }
}

/// `{$slice: n}` and `{$slice: [skip, n]}` are projections; any other
/// `$slice` operand is the array expression
fn is_slice_projection(operand: &Value) -> bool {
    match operand {
        Value::Array(items) => items.len() == 2 && items.iter().all(Value::is_number),
        other => other.is_number(),
    }
}

fn parse_node(value: &Value) -> AggResult<Node> {
    match value {
        Value::Boolean(_) => Ok(if is_truthy(value) {
            Node::Include
        } else {
            Node::Exclude
        }),
        v if v.is_number() => Ok(if is_truthy(v) {
            Node::Include
        } else {
            Node::Exclude
        }),
        Value::Document(doc) => {
            if let Some((key, operand)) = doc.single_entry() {
                if key == "$slice" && is_slice_projection(operand) {
                    return parse_slice(operand);
                }
                if key == "$elemMatch" {
                    return Ok(Node::ElemMatch(parse_elem_match(operand)?));
                }
            }
            if doc.keys().next().map_or(false, |k| k.starts_with('$')) {
                return Ok(Node::Computed(Expression::parse(value)?));
            }
            if doc.is_empty() {
                return Err(AggError::invalid_stage(
                    "an empty object is not a valid projection value",
                ));
            }
            let mut children = Vec::new();
            for (key, child) in doc.iter() {
                let path = FieldPath::parse(key)?;
                insert_node(&mut children, path.segments(), parse_node(child)?, key)?;
            }
            Ok(Node::Nested(children))
        }
        other => Ok(Node::Computed(Expression::parse(other)?)),
    }
}

#[derive(Default)]
struct Usage {
    include: bool,
    exclude: bool,
    elem_match: bool,
    id_included: bool,
}

fn scan_usage(nodes: &[(String, Node)], top: bool, usage: &mut Usage) {
    for (key, node) in nodes {
        let is_id = top && key == "_id";
        match node {
            Node::Include if is_id => usage.id_included = true,
            Node::Exclude if is_id => {}
            Node::Include | Node::Positional => usage.include = true,
            Node::Computed(_) => {
                usage.include = true;
                if is_id {
                    usage.id_included = true;
                }
            }
            Node::Exclude => usage.exclude = true,
            Node::Nested(children) => scan_usage(children, false, usage),
            Node::ElemMatch(_) => usage.elem_match = true,
            Node::Slice { .. } => {}
        }
    }
}

impl Projection {
    /// Parse a projection; `preceding` is the filter of the nearest
    /// preceding `$match`, required by positional projections
    pub fn parse(spec: &Document, preceding: Option<&Filter>) -> AggResult<Self> {
        if spec.is_empty() {
            return Err(AggError::invalid_stage(
                "$project requires at least one output field",
            ));
        }
        let mut fields = Vec::new();
        let mut positional: Option<Positional> = None;
        for (key, value) in spec.iter() {
            if let Some(array_path) = key.strip_suffix(".$") {
                if !(value.is_number() || value.as_bool().is_some()) || !is_truthy(value) {
                    return Err(AggError::invalid_stage(format!(
                        "positional projection '{}' must be 1 or true",
                        key
                    )));
                }
                if positional.is_some() {
                    return Err(AggError::invalid_stage(
                        "only one positional projection is allowed",
                    ));
                }
                let path = FieldPath::parse(array_path)?;
                let filter = preceding.ok_or_else(|| {
                    AggError::invalid_stage(format!(
                        "positional projection '{}' requires a preceding $match",
                        key
                    ))
                })?;
                let clauses = filter.clauses_on(&path);
                if clauses.is_empty() {
                    return Err(AggError::invalid_stage(format!(
                        "positional projection '{}' requires a $match condition on '{}'",
                        key, path
                    )));
                }
                insert_node(&mut fields, path.segments(), Node::Positional, key)?;
                positional = Some(Positional { path, clauses });
                continue;
            }
            let path = FieldPath::parse(key)?;
            insert_node(&mut fields, path.segments(), parse_node(value)?, key)?;
        }

        let mut usage = Usage::default();
        scan_usage(&fields, true, &mut usage);
        let mode = match (usage.include, usage.exclude) {
            (true, true) => {
                return Err(AggError::invalid_stage(
                    "cannot mix inclusion and exclusion in a projection",
                ))
            }
            (true, false) => Mode::Inclusion,
            (false, true) => Mode::Exclusion,
            (false, false) if usage.elem_match || usage.id_included => Mode::Inclusion,
            (false, false) => Mode::Exclusion,
        };
        Ok(Self {
            fields,
            mode,
            positional,
        })
    }

    pub fn is_inclusion(&self) -> bool {
        self.mode == Mode::Inclusion
    }

    /// Project one document
    pub fn apply(&self, doc: &Document, meta: &Metadata) -> AggResult<Document> {
        let positional = match &self.positional {
            Some(p) => p.resolve(doc)?,
            None => None,
        };
        match self.mode {
            Mode::Inclusion => {
                let mut out = Document::new();
                include_level(doc, &self.fields, true, &positional, &mut out)?;
                let evaluator = Evaluator::with_meta(doc, *meta);
                add_computed(&self.fields, &[], &evaluator, &mut out)?;
                Ok(out)
            }
            Mode::Exclusion => {
                let mut out = doc.clone();
                exclude_level(&mut out, &self.fields)?;
                Ok(out)
            }
        }
    }
}

fn include_level(
    src: &Document,
    nodes: &[(String, Node)],
    top: bool,
    positional: &Option<Value>,
    out: &mut Document,
) -> AggResult<()> {
    for (key, value) in src.iter() {
        match nodes.iter().find(|(k, _)| k == key) {
            Some((_, node)) => {
                if let Some(projected) = include_value(value, node, positional)? {
                    out.insert(key.clone(), projected);
                }
            }
            None if top && key == "_id" => {
                out.insert(key.clone(), value.clone());
            }
            None => {}
        }
    }
    Ok(())
}

fn first_match(items: &[Value], elem_match: &ElemMatch) -> AggResult<Option<Value>> {
    for item in items {
        if elem_match.matches(item)? {
            return Ok(Some(Value::Array(vec![item.clone()])));
        }
    }
    Ok(None)
}

fn sliced(items: &[Value], skip: Option<i64>, n: i64) -> Value {
    let (start, end) = slice_window(items.len(), skip, n);
    Value::Array(items[start..end].to_vec())
}

fn include_value(
    value: &Value,
    node: &Node,
    positional: &Option<Value>,
) -> AggResult<Option<Value>> {
    Ok(match node {
        Node::Include => Some(value.clone()),
        Node::Exclude | Node::Computed(_) => None,
        Node::Positional => positional.clone(),
        Node::Slice { skip, n } => Some(match value {
            Value::Array(items) => sliced(items, *skip, *n),
            other => other.clone(),
        }),
        Node::ElemMatch(elem_match) => match value {
            Value::Array(items) => first_match(items, elem_match)?,
            _ => None,
        },
        Node::Nested(children) => match value {
            Value::Document(doc) => {
                let mut sub = Document::new();
                include_level(doc, children, false, positional, &mut sub)?;
                Some(Value::Document(sub))
            }
            Value::Array(items) => {
                let mut projected = Vec::with_capacity(items.len());
                for item in items {
                    if matches!(item, Value::Document(_) | Value::Array(_)) {
                        if let Some(v) = include_value(item, node, positional)? {
                            projected.push(v);
                        }
                    }
                }
                Some(Value::Array(projected))
            }
            _ => None,
        },
    })
}

fn add_computed(
    nodes: &[(String, Node)],
    prefix: &[String],
    evaluator: &Evaluator<'_>,
    out: &mut Document,
) -> AggResult<()> {
    for (key, node) in nodes {
        match node {
            Node::Computed(expr) => {
                let value = evaluator.evaluate(expr)?;
                if value.is_missing() {
                    continue;
                }
                if prefix.is_empty() && key == "_id" {
                    out.insert_first(key.clone(), value);
                } else {
                    let mut segments = prefix.to_vec();
                    segments.push(key.clone());
                    set_path(out, &FieldPath::from_segments(segments), value);
                }
            }
            Node::Nested(children) => {
                let mut segments = prefix.to_vec();
                segments.push(key.clone());
                add_computed(children, &segments, evaluator, out)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn exclude_level(doc: &mut Document, nodes: &[(String, Node)]) -> AggResult<()> {
    for (key, node) in nodes {
        match node {
            Node::Exclude => {
                doc.remove(key);
            }
            Node::Slice { skip, n } => {
                if let Some(Value::Array(items)) = doc.get(key) {
                    let value = sliced(items, *skip, *n);
                    doc.insert(key.clone(), value);
                }
            }
            Node::ElemMatch(elem_match) => {
                let kept = match doc.get(key) {
                    Some(Value::Array(items)) => first_match(items, elem_match)?,
                    _ => None,
                };
                match kept {
                    Some(value) => {
                        doc.insert(key.clone(), value);
                    }
                    None => {
                        doc.remove(key);
                    }
                }
            }
            Node::Nested(children) => {
                if let Some(value) = doc.get_mut(key) {
                    exclude_value(value, children)?;
                }
            }
            Node::Include | Node::Computed(_) | Node::Positional => {}
        }
    }
    Ok(())
}

fn exclude_value(value: &mut Value, nodes: &[(String, Node)]) -> AggResult<()> {
    match value {
        Value::Document(doc) => exclude_level(doc, nodes),
        Value::Array(items) => {
            for item in items {
                exclude_value(item, nodes)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub struct ProjectStage {
    upstream: BoxedStream,
    projection: Projection,
}

impl ProjectStage {
    pub fn new(upstream: BoxedStream, projection: Projection) -> Self {
        Self {
            upstream,
            projection,
        }
    }
}

impl RowStream for ProjectStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        while let Some(row) = self.upstream.next_row(ctx)? {
            match self.projection.apply(&row.doc, &row.meta) {
                Ok(doc) => return Ok(Some(Row::with_meta(doc, row.meta))),
                Err(e) => ctx.recover("$project", e)?,
            }
        }
        Ok(None)
    }
}

/// A parsed `$addFields` / `$set` specification
#[derive(Debug, Clone)]
pub struct AddFieldsSpec {
    fields: Vec<(FieldPath, Expression)>,
}

impl AddFieldsSpec {
    pub fn parse(spec: &Document) -> AggResult<Self> {
        if spec.is_empty() {
            return Err(AggError::invalid_stage(
                "$addFields requires at least one field",
            ));
        }
        let fields = spec
            .iter()
            .map(|(key, value)| Ok((FieldPath::parse(key)?, Expression::parse(value)?)))
            .collect::<AggResult<Vec<_>>>()?;
        Ok(Self { fields })
    }

    /// Evaluate every field against the input and merge the results
    pub fn apply(&self, doc: &Document, meta: &Metadata) -> AggResult<Document> {
        let evaluator = Evaluator::with_meta(doc, *meta);
        let mut out = doc.clone();
        for (path, expr) in &self.fields {
            let value = evaluator.evaluate(expr)?;
            set_path(&mut out, path, value);
        }
        Ok(out)
    }
}

pub struct AddFieldsStage {
    upstream: BoxedStream,
    spec: AddFieldsSpec,
}

impl AddFieldsStage {
    pub fn new(upstream: BoxedStream, spec: AddFieldsSpec) -> Self {
        Self { upstream, spec }
    }
}

impl RowStream for AddFieldsStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        while let Some(row) = self.upstream.next_row(ctx)? {
            match self.spec.apply(&row.doc, &row.meta) {
                Ok(doc) => return Ok(Some(Row::with_meta(doc, row.meta))),
                Err(e) => ctx.recover("$addFields", e)?,
            }
        }
        Ok(None)
    }
}
