//! Expression tree and descriptor parsing
//!
//! Descriptor forms:
//!
//! - `"$a.b"` field path, `"$$name.path"` variable, `"text"` literal
//! - `{"$op": args}` operator application (args as array or single value)
//! - `{"$literal": v}` escapes operator interpretation
//! - `{k: expr, ...}` object, `[expr, ...]` array
//!
//! Arity, operator names and variable scoping are checked while parsing so
//! malformed expressions are rejected before any document flows.

use crate::errors::{AggError, AggResult};
use crate::value::{Document, FieldPath, Value};

use super::conversion::ConvertTarget;
use super::dates::DatePart;

/// Operators applied to positional arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Concat,
    ToUpper,
    ToLower,
    SubstrCP,
    StrLenCP,
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Abs,
    IfNull,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Cmp,
    And,
    Or,
    Not,
    Size,
    Slice,
    ArrayElemAt,
    In,
    IsArray,
}

/// Accepted argument counts
#[derive(Debug, Clone, Copy)]
enum Arity {
    Exactly(usize),
    Between(usize, usize),
    AtLeast(usize),
    Any,
}

impl Operator {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "$concat" => Operator::Concat,
            "$toUpper" => Operator::ToUpper,
            "$toLower" => Operator::ToLower,
            "$substrCP" => Operator::SubstrCP,
            "$strLenCP" => Operator::StrLenCP,
            "$add" => Operator::Add,
            "$subtract" => Operator::Subtract,
            "$multiply" => Operator::Multiply,
            "$divide" => Operator::Divide,
            "$mod" => Operator::Mod,
            "$abs" => Operator::Abs,
            "$ifNull" => Operator::IfNull,
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$cmp" => Operator::Cmp,
            "$and" => Operator::And,
            "$or" => Operator::Or,
            "$not" => Operator::Not,
            "$size" => Operator::Size,
            "$slice" => Operator::Slice,
            "$arrayElemAt" => Operator::ArrayElemAt,
            "$in" => Operator::In,
            "$isArray" => Operator::IsArray,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Concat => "$concat",
            Operator::ToUpper => "$toUpper",
            Operator::ToLower => "$toLower",
            Operator::SubstrCP => "$substrCP",
            Operator::StrLenCP => "$strLenCP",
            Operator::Add => "$add",
            Operator::Subtract => "$subtract",
            Operator::Multiply => "$multiply",
            Operator::Divide => "$divide",
            Operator::Mod => "$mod",
            Operator::Abs => "$abs",
            Operator::IfNull => "$ifNull",
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::Cmp => "$cmp",
            Operator::And => "$and",
            Operator::Or => "$or",
            Operator::Not => "$not",
            Operator::Size => "$size",
            Operator::Slice => "$slice",
            Operator::ArrayElemAt => "$arrayElemAt",
            Operator::In => "$in",
            Operator::IsArray => "$isArray",
        }
    }

    fn arity(&self) -> Arity {
        match self {
            Operator::Concat
            | Operator::Add
            | Operator::Multiply
            | Operator::And
            | Operator::Or => Arity::Any,
            Operator::ToUpper
            | Operator::ToLower
            | Operator::StrLenCP
            | Operator::Abs
            | Operator::Not
            | Operator::Size
            | Operator::IsArray => Arity::Exactly(1),
            Operator::Subtract
            | Operator::Divide
            | Operator::Mod
            | Operator::Eq
            | Operator::Ne
            | Operator::Gt
            | Operator::Gte
            | Operator::Lt
            | Operator::Lte
            | Operator::Cmp
            | Operator::ArrayElemAt
            | Operator::In => Arity::Exactly(2),
            Operator::SubstrCP => Arity::Exactly(3),
            Operator::Slice => Arity::Between(2, 3),
            Operator::IfNull => Arity::AtLeast(2),
        }
    }
}

/// Which side `$trim` strips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimSide {
    Both,
    Start,
    End,
}

/// Row metadata readable through `$meta`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    TextScore,
    GeoNearDistance,
}

impl MetaField {
    pub fn parse(name: &Value) -> AggResult<Self> {
        match name.as_str() {
            Some("textScore") => Ok(MetaField::TextScore),
            Some("geoNearDistance") => Ok(MetaField::GeoNearDistance),
            _ => Err(AggError::invalid_stage(format!(
                "$meta: unsupported metadata {}",
                name
            ))),
        }
    }
}

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Field(FieldPath),
    Variable {
        name: String,
        path: Option<FieldPath>,
    },
    Array(Vec<Expression>),
    Object(Vec<(String, Expression)>),
    Call(Operator, Vec<Expression>),
    Cond {
        test: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
    Convert {
        input: Box<Expression>,
        to: ConvertTarget,
        on_error: Option<Box<Expression>>,
        on_null: Option<Box<Expression>>,
    },
    Filter {
        input: Box<Expression>,
        binding: String,
        cond: Box<Expression>,
    },
    Trim {
        side: TrimSide,
        input: Box<Expression>,
        chars: Option<Box<Expression>>,
    },
    DatePart {
        part: DatePart,
        date: Box<Expression>,
    },
    Meta(MetaField),
}

const BUILTIN_VARIABLES: [&str; 2] = ["ROOT", "CURRENT"];

impl Expression {
    /// Parse an expression descriptor
    pub fn parse(value: &Value) -> AggResult<Expression> {
        Parser { scope: Vec::new() }.parse(value)
    }

    /// Field path expression shorthand
    pub fn field(path: &str) -> AggResult<Expression> {
        Ok(Expression::Field(FieldPath::parse(path)?))
    }

    /// Whether the expression only reads a field path
    pub fn as_field(&self) -> Option<&FieldPath> {
        match self {
            Expression::Field(path) => Some(path),
            _ => None,
        }
    }
}

struct Parser {
    scope: Vec<String>,
}

impl Parser {
    fn parse(&mut self, value: &Value) -> AggResult<Expression> {
        match value {
            Value::String(s) if s.starts_with("$$") => self.parse_variable(&s[2..]),
            Value::String(s) if s.starts_with('$') => {
                Ok(Expression::Field(FieldPath::parse_reference(s)?))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.parse(item))
                .collect::<AggResult<Vec<_>>>()
                .map(Expression::Array),
            Value::Document(doc) => self.parse_document(doc),
            other => Ok(Expression::Literal(other.clone())),
        }
    }

    fn parse_variable(&mut self, reference: &str) -> AggResult<Expression> {
        let (name, rest) = match reference.split_once('.') {
            Some((name, rest)) => (name, Some(rest)),
            None => (reference, None),
        };
        if name.is_empty() {
            return Err(AggError::invalid_stage("empty variable name"));
        }
        if !BUILTIN_VARIABLES.contains(&name) && !self.scope.iter().any(|v| v == name) {
            return Err(AggError::invalid_stage(format!(
                "use of undefined variable: {}",
                name
            )));
        }
        let path = rest.map(FieldPath::parse).transpose()?;
        Ok(Expression::Variable {
            name: name.to_string(),
            path,
        })
    }

    fn parse_document(&mut self, doc: &Document) -> AggResult<Expression> {
        let first_is_operator = doc.keys().next().map_or(false, |k| k.starts_with('$'));
        if !first_is_operator {
            let mut fields = Vec::with_capacity(doc.len());
            for (key, value) in doc.iter() {
                if key.starts_with('$') || key.contains('.') {
                    return Err(AggError::invalid_stage(format!(
                        "invalid field name '{}' in expression object",
                        key
                    )));
                }
                fields.push((key.clone(), self.parse(value)?));
            }
            return Ok(Expression::Object(fields));
        }

        let (name, args) = doc.single_entry().ok_or_else(|| {
            AggError::invalid_stage(
                "an expression specification must contain exactly one operator field",
            )
        })?;
        self.parse_operator(name, args)
    }

    fn parse_operator(&mut self, name: &str, args: &Value) -> AggResult<Expression> {
        match name {
            "$literal" => return Ok(Expression::Literal(args.clone())),
            "$meta" => return Ok(Expression::Meta(MetaField::parse(args)?)),
            "$cond" => return self.parse_cond(args),
            "$convert" => return self.parse_convert(args),
            "$filter" => return self.parse_filter(args),
            "$trim" => return self.parse_trim(TrimSide::Both, args),
            "$ltrim" => return self.parse_trim(TrimSide::Start, args),
            "$rtrim" => return self.parse_trim(TrimSide::End, args),
            _ => {}
        }

        if let Some(to) = ConvertTarget::from_sugar(name) {
            let input = self.single_argument(name, args)?;
            return Ok(Expression::Convert {
                input: Box::new(input),
                to,
                on_error: None,
                on_null: None,
            });
        }

        if let Some(part) = DatePart::from_operator(name) {
            return self.parse_date_part(part, name, args);
        }

        let op = Operator::from_name(name).ok_or_else(|| {
            AggError::invalid_stage(format!("unrecognized expression operator '{}'", name))
        })?;

        let parsed = match args {
            Value::Array(items) => items
                .iter()
                .map(|item| self.parse(item))
                .collect::<AggResult<Vec<_>>>()?,
            single => vec![self.parse(single)?],
        };

        let ok = match op.arity() {
            Arity::Exactly(n) => parsed.len() == n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&parsed.len()),
            Arity::AtLeast(n) => parsed.len() >= n,
            Arity::Any => true,
        };
        if !ok {
            return Err(AggError::invalid_stage(format!(
                "{}: wrong number of arguments ({})",
                op.name(),
                parsed.len()
            )));
        }

        Ok(Expression::Call(op, parsed))
    }

    fn single_argument(&mut self, name: &str, args: &Value) -> AggResult<Expression> {
        match args {
            Value::Array(items) if items.len() == 1 => self.parse(&items[0]),
            Value::Array(items) => Err(AggError::invalid_stage(format!(
                "{}: expected 1 argument, got {}",
                name,
                items.len()
            ))),
            single => self.parse(single),
        }
    }

    fn object_args<'d>(
        &self,
        name: &str,
        args: &'d Value,
        allowed: &[&str],
    ) -> AggResult<&'d Document> {
        let doc = args.as_document().ok_or_else(|| {
            AggError::invalid_stage(format!("{} expects an object argument", name))
        })?;
        if let Some(unknown) = doc.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(AggError::invalid_stage(format!(
                "{}: unrecognized parameter '{}'",
                name, unknown
            )));
        }
        Ok(doc)
    }

    fn required<'d>(&self, name: &str, doc: &'d Document, key: &str) -> AggResult<&'d Value> {
        doc.get(key).ok_or_else(|| {
            AggError::invalid_stage(format!("{}: missing required parameter '{}'", name, key))
        })
    }

    fn parse_cond(&mut self, args: &Value) -> AggResult<Expression> {
        let (test, then, otherwise) = match args {
            Value::Array(items) if items.len() == 3 => {
                (self.parse(&items[0])?, self.parse(&items[1])?, self.parse(&items[2])?)
            }
            Value::Document(_) => {
                let doc = self.object_args("$cond", args, &["if", "then", "else"])?;
                (
                    self.parse(self.required("$cond", doc, "if")?)?,
                    self.parse(self.required("$cond", doc, "then")?)?,
                    self.parse(self.required("$cond", doc, "else")?)?,
                )
            }
            _ => {
                return Err(AggError::invalid_stage(
                    "$cond expects {if, then, else} or a 3 element array",
                ))
            }
        };
        Ok(Expression::Cond {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_convert(&mut self, args: &Value) -> AggResult<Expression> {
        let doc = self.object_args("$convert", args, &["input", "to", "onError", "onNull"])?;
        let input = self.parse(self.required("$convert", doc, "input")?)?;
        let to = ConvertTarget::parse(self.required("$convert", doc, "to")?)?;
        let on_error = match doc.get("onError") {
            Some(v) => Some(Box::new(self.parse(v)?)),
            None => None,
        };
        let on_null = match doc.get("onNull") {
            Some(v) => Some(Box::new(self.parse(v)?)),
            None => None,
        };
        Ok(Expression::Convert {
            input: Box::new(input),
            to,
            on_error,
            on_null,
        })
    }

    fn parse_filter(&mut self, args: &Value) -> AggResult<Expression> {
        let doc = self.object_args("$filter", args, &["input", "as", "cond"])?;
        let input = self.parse(self.required("$filter", doc, "input")?)?;
        let binding = match doc.get("as") {
            Some(Value::String(s)) if !s.is_empty() && !s.starts_with('$') => s.clone(),
            Some(other) => {
                return Err(AggError::invalid_stage(format!(
                    "$filter: invalid variable name {}",
                    other
                )))
            }
            None => "this".to_string(),
        };
        self.scope.push(binding.clone());
        let cond = self.parse(self.required("$filter", doc, "cond")?);
        self.scope.pop();
        Ok(Expression::Filter {
            input: Box::new(input),
            binding,
            cond: Box::new(cond?),
        })
    }

    fn parse_trim(&mut self, side: TrimSide, args: &Value) -> AggResult<Expression> {
        let name = match side {
            TrimSide::Both => "$trim",
            TrimSide::Start => "$ltrim",
            TrimSide::End => "$rtrim",
        };
        let doc = self.object_args(name, args, &["input", "chars"])?;
        let input = self.parse(self.required(name, doc, "input")?)?;
        let chars = match doc.get("chars") {
            Some(v) => Some(Box::new(self.parse(v)?)),
            None => None,
        };
        Ok(Expression::Trim {
            side,
            input: Box::new(input),
            chars,
        })
    }

    fn parse_date_part(&mut self, part: DatePart, name: &str, args: &Value) -> AggResult<Expression> {
        let date = match args {
            Value::Document(doc) if doc.contains_key("date") => {
                let doc = self.object_args(name, args, &["date", "timezone"])?;
                if let Some(tz) = doc.get("timezone") {
                    match tz.as_str() {
                        Some("UTC") | Some("Z") | Some("+00:00") | Some("GMT") => {}
                        _ => {
                            return Err(AggError::invalid_stage(format!(
                                "{}: only UTC timezone is supported, got {}",
                                name, tz
                            )))
                        }
                    }
                }
                self.parse(self.required(name, doc, "date")?)?
            }
            other => self.single_argument(name, other)?,
        };
        Ok(Expression::DatePart {
            part,
            date: Box::new(date),
        })
    }
}
