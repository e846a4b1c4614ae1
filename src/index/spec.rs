//! Index definitions
//!
//! An index is described by a key pattern (`{email: 1}`, `{a: 1, b: -1}`,
//! `{title: "text", body: "text"}`, `{loc: "2dsphere"}`) and options.
//! Definitions are validated when they are built, never when used.

use crate::errors::{AggError, AggResult};
use crate::query::{Filter, TextLanguage};
use crate::value::{Document, FieldPath, Value};

use super::key::Direction;

/// Name of the primary key index present on every collection
pub const ID_INDEX_NAME: &str = "_id_";

const MAX_TEXT_WEIGHT: i64 = 99_999;

/// Index kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Single-field or compound B-tree index
    Regular,
    /// Tokenized text index
    Text,
    /// Spherical geo index
    Geo2dSphere,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Regular => "regular",
            IndexKind::Text => "text",
            IndexKind::Geo2dSphere => "2dsphere",
        }
    }
}

/// One indexed field
#[derive(Debug, Clone, PartialEq)]
pub struct IndexField {
    pub path: FieldPath,
    pub direction: Direction,
}

/// Options accepted by `create_index`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: bool,
    pub partial_filter_expression: Option<Document>,
    pub expire_after_seconds: Option<i64>,
    pub weights: Option<Document>,
    pub default_language: Option<String>,
}

impl IndexOptions {
    /// Parse an options document (`{unique: true, name: "..."}`)
    pub fn from_document(doc: &Document) -> AggResult<Self> {
        let mut options = IndexOptions::default();
        for (key, value) in doc.iter() {
            match key.as_str() {
                "name" => {
                    options.name = Some(
                        value
                            .as_str()
                            .ok_or_else(|| AggError::invalid_index("name must be a string"))?
                            .to_string(),
                    )
                }
                "unique" => {
                    options.unique = value
                        .as_bool()
                        .ok_or_else(|| AggError::invalid_index("unique must be a bool"))?
                }
                "partialFilterExpression" => {
                    options.partial_filter_expression = Some(
                        value
                            .as_document()
                            .ok_or_else(|| {
                                AggError::invalid_index("partialFilterExpression must be an object")
                            })?
                            .clone(),
                    )
                }
                "expireAfterSeconds" => {
                    options.expire_after_seconds = Some(value.as_i64().ok_or_else(|| {
                        AggError::invalid_index("expireAfterSeconds must be an integer")
                    })?)
                }
                "weights" => {
                    options.weights = Some(
                        value
                            .as_document()
                            .ok_or_else(|| AggError::invalid_index("weights must be an object"))?
                            .clone(),
                    )
                }
                "default_language" => {
                    options.default_language = Some(
                        value
                            .as_str()
                            .ok_or_else(|| {
                                AggError::invalid_index("default_language must be a string")
                            })?
                            .to_string(),
                    )
                }
                other => {
                    return Err(AggError::invalid_index(format!(
                        "unknown index option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(options)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn partial_filter(mut self, filter: Document) -> Self {
        self.partial_filter_expression = Some(filter);
        self
    }

    pub fn expire_after_seconds(mut self, seconds: i64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }

    pub fn weights(mut self, weights: Document) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = Some(language.into());
        self
    }
}

/// A validated index definition
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub kind: IndexKind,
    pub fields: Vec<IndexField>,
    pub unique: bool,
    pub partial_filter: Option<Filter>,
    pub expire_after_seconds: Option<i64>,
    /// Per-field weights of a text index, in key pattern order
    pub weights: Vec<(FieldPath, i64)>,
    pub default_language: TextLanguage,
    key_pattern: Document,
    partial_filter_doc: Option<Document>,
}

fn parse_key_pattern(pattern: &Document) -> AggResult<(IndexKind, Vec<IndexField>)> {
    if pattern.is_empty() {
        return Err(AggError::invalid_index("key pattern must not be empty"));
    }
    let mut kind = None;
    let mut fields = Vec::with_capacity(pattern.len());
    for (field, value) in pattern.iter() {
        let path = FieldPath::parse(field).map_err(|e| AggError::invalid_index(e.message()))?;
        let (field_kind, direction) = match value {
            Value::String(s) if s == "text" => (IndexKind::Text, Direction::Ascending),
            Value::String(s) if s == "2dsphere" => (IndexKind::Geo2dSphere, Direction::Ascending),
            other => match other.as_f64() {
                Some(n) if n > 0.0 => (IndexKind::Regular, Direction::Ascending),
                Some(n) if n < 0.0 => (IndexKind::Regular, Direction::Descending),
                _ => {
                    return Err(AggError::invalid_index(format!(
                        "invalid key pattern value for '{}': {}",
                        field, other
                    )))
                }
            },
        };
        match kind {
            None => kind = Some(field_kind),
            Some(k) if k != field_kind => {
                return Err(AggError::invalid_index(
                    "cannot mix text, 2dsphere and regular fields in one index",
                ))
            }
            Some(_) => {}
        }
        if fields.iter().any(|f: &IndexField| f.path == path) {
            return Err(AggError::invalid_index(format!("field '{}' appears twice", field)));
        }
        fields.push(IndexField { path, direction });
    }
    let kind = kind.unwrap_or(IndexKind::Regular);
    if kind == IndexKind::Geo2dSphere && fields.len() != 1 {
        return Err(AggError::invalid_index("a 2dsphere index covers exactly one field"));
    }
    Ok((kind, fields))
}

fn default_name(pattern: &Document) -> String {
    pattern
        .iter()
        .map(|(field, value)| match value {
            Value::String(s) => format!("{}_{}", field, s),
            other if other.as_f64().map_or(false, |n| n < 0.0) => format!("{}_-1", field),
            _ => format!("{}_1", field),
        })
        .collect::<Vec<_>>()
        .join("_")
}

impl IndexSpec {
    /// The unique `_id` index
    pub fn id_index() -> Self {
        let key_pattern = Document::from_pairs(vec![("_id", Value::Int32(1))]);
        Self {
            name: ID_INDEX_NAME.to_string(),
            kind: IndexKind::Regular,
            fields: vec![IndexField {
                path: FieldPath::from_segments(vec!["_id".to_string()]),
                direction: Direction::Ascending,
            }],
            unique: true,
            partial_filter: None,
            expire_after_seconds: None,
            weights: Vec::new(),
            default_language: TextLanguage::English,
            key_pattern,
            partial_filter_doc: None,
        }
    }

    /// Validate a key pattern and options into a definition
    pub fn build(
        key_pattern: &Document,
        options: &IndexOptions,
        fallback_language: TextLanguage,
    ) -> AggResult<Self> {
        let (kind, fields) = parse_key_pattern(key_pattern)?;

        let name = options
            .name
            .clone()
            .unwrap_or_else(|| default_name(key_pattern));
        if name.is_empty() {
            return Err(AggError::invalid_index("index name must not be empty"));
        }

        if options.unique && kind != IndexKind::Regular {
            return Err(AggError::invalid_index(format!(
                "unique is not supported on {} indexes",
                kind.as_str()
            )));
        }

        if let Some(seconds) = options.expire_after_seconds {
            if seconds < 0 {
                return Err(AggError::invalid_index("expireAfterSeconds must be >= 0"));
            }
            if kind != IndexKind::Regular || fields.len() != 1 {
                return Err(AggError::invalid_index(
                    "expireAfterSeconds requires a single-field index",
                ));
            }
            if fields[0].path.dotted() == "_id" {
                return Err(AggError::invalid_index("expireAfterSeconds is not allowed on _id"));
            }
        }

        if kind != IndexKind::Text
            && (options.weights.is_some() || options.default_language.is_some())
        {
            return Err(AggError::invalid_index(
                "weights and default_language are only valid for text indexes",
            ));
        }

        let default_language = match &options.default_language {
            Some(name) => TextLanguage::parse(name).ok_or_else(|| {
                AggError::invalid_index(format!("unsupported default_language '{}'", name))
            })?,
            None => fallback_language,
        };

        let mut weights = Vec::new();
        if kind == IndexKind::Text {
            weights = fields.iter().map(|f| (f.path.clone(), 1)).collect();
            if let Some(spec) = &options.weights {
                for (field, value) in spec.iter() {
                    let weight = value
                        .as_i64()
                        .filter(|w| (1..=MAX_TEXT_WEIGHT).contains(w))
                        .ok_or_else(|| {
                            AggError::invalid_index(format!(
                                "weight for '{}' must be an integer in 1..={}",
                                field, MAX_TEXT_WEIGHT
                            ))
                        })?;
                    let slot = weights
                        .iter_mut()
                        .find(|(path, _)| path.dotted() == *field)
                        .ok_or_else(|| {
                            AggError::invalid_index(format!(
                                "weight given for '{}' which is not a text field",
                                field
                            ))
                        })?;
                    slot.1 = weight;
                }
            }
        }

        let partial_filter = match &options.partial_filter_expression {
            Some(doc) => {
                let filter = Filter::parse(doc).map_err(|e| {
                    AggError::invalid_index(format!("partialFilterExpression: {}", e.message()))
                })?;
                if filter.contains_text() {
                    return Err(AggError::invalid_index(
                        "partialFilterExpression cannot use $text",
                    ));
                }
                Some(filter)
            }
            None => None,
        };

        Ok(Self {
            name,
            kind,
            fields,
            unique: options.unique,
            partial_filter,
            expire_after_seconds: options.expire_after_seconds,
            weights,
            default_language,
            key_pattern: key_pattern.clone(),
            partial_filter_doc: options.partial_filter_expression.clone(),
        })
    }

    pub fn key_pattern(&self) -> &Document {
        &self.key_pattern
    }

    /// Fields with their directions, as used for key extraction
    pub fn key_fields(&self) -> Vec<(FieldPath, Direction)> {
        self.fields
            .iter()
            .map(|f| (f.path.clone(), f.direction))
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        self.partial_filter.is_some()
    }

    pub fn is_ttl(&self) -> bool {
        self.expire_after_seconds.is_some()
    }

    /// Whether two definitions describe the same index
    pub fn same_definition(&self, other: &IndexSpec) -> bool {
        self.key_pattern == other.key_pattern
            && self.unique == other.unique
            && self.partial_filter_doc == other.partial_filter_doc
            && self.expire_after_seconds == other.expire_after_seconds
            && self.weights == other.weights
            && self.default_language == other.default_language
    }

    /// Listing form (`listIndexes`)
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("name", Value::from(self.name.as_str()));
        doc.insert("key", Value::Document(self.key_pattern.clone()));
        if self.unique {
            doc.insert("unique", Value::Boolean(true));
        }
        if let Some(filter) = &self.partial_filter_doc {
            doc.insert("partialFilterExpression", Value::Document(filter.clone()));
        }
        if let Some(seconds) = self.expire_after_seconds {
            doc.insert("expireAfterSeconds", Value::Int64(seconds));
        }
        if self.kind == IndexKind::Text {
            let weights = self
                .weights
                .iter()
                .map(|(path, w)| (path.dotted(), Value::Int64(*w)))
                .collect::<Vec<_>>();
            doc.insert("weights", Value::Document(Document::from_pairs(weights)));
            doc.insert("default_language", Value::from(self.default_language.name()));
        }
        doc
    }
}
