//! Index keys and key extraction
//!
//! A key is a tuple with one part per indexed field. Parts compare with the
//! value total order, reversed for descending fields. `Min` and `Max` are
//! sentinels used only in scan bounds.

use std::cmp::Ordering;
use std::fmt;

use crate::errors::{AggError, AggResult};
use crate::value::path::collect;
use crate::value::{compare, Document, FieldPath, OrdValue, Value};

/// Sort direction of an indexed field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_i32(&self) -> i32 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }

    pub fn reverse(&self) -> Direction {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
        }
    }
}

/// One component of an index key
#[derive(Debug, Clone)]
pub enum KeyPart {
    Min,
    Value(OrdValue, Direction),
    Max,
}

impl KeyPart {
    pub fn value(value: Value, direction: Direction) -> Self {
        KeyPart::Value(OrdValue(value), direction)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            KeyPart::Value(v, _) => Some(&v.0),
            _ => None,
        }
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Min, KeyPart::Min) | (KeyPart::Max, KeyPart::Max) => Ordering::Equal,
            (KeyPart::Min, _) | (_, KeyPart::Max) => Ordering::Less,
            (_, KeyPart::Min) | (KeyPart::Max, _) => Ordering::Greater,
            (KeyPart::Value(a, direction), KeyPart::Value(b, _)) => {
                let ord = compare(&a.0, &b.0);
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            }
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Min => write!(f, "MinKey"),
            KeyPart::Max => write!(f, "MaxKey"),
            KeyPart::Value(v, _) => write!(f, "{}", v.0),
        }
    }
}

/// Index key tuple, ordered lexicographically
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexKey(pub Vec<KeyPart>);

impl IndexKey {
    /// Single-part ascending key
    pub fn single(value: Value) -> Self {
        IndexKey(vec![KeyPart::value(value, Direction::Ascending)])
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// First part as a value, if it is not a sentinel
    pub fn leading_value(&self) -> Option<&Value> {
        self.0.first().and_then(KeyPart::as_value)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "{}", self.0[0]);
        }
        write!(f, "(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, ")")
    }
}

/// Leaf values of one indexed field and whether an array was expanded
pub(crate) fn field_values(doc: &Document, path: &FieldPath) -> (Vec<Value>, bool) {
    let leaves = collect(doc, path);
    let mut expanded = leaves.len() > 1;
    let mut values: Vec<Value> = Vec::new();
    for leaf in leaves {
        match leaf {
            Value::Array(items) => {
                expanded = true;
                if items.is_empty() {
                    values.push(Value::Null);
                }
                values.extend(items.iter().cloned());
            }
            other => values.push(other.clone()),
        }
    }
    if values.is_empty() {
        values.push(Value::Null);
    }
    values.sort_by(compare);
    values.dedup_by(|a, b| compare(a, b) == Ordering::Equal);
    (values, expanded)
}

/// Keys generated for a document by a regular index
#[derive(Debug, Clone, Default)]
pub struct ExtractedKeys {
    pub keys: Vec<IndexKey>,
    /// An indexed field held an array
    pub multikey: bool,
}

/// Generate index keys: one per array element for a multikey field.
///
/// At most one field of a compound index may hold an array.
pub fn extract_keys(
    index_name: &str,
    doc: &Document,
    fields: &[(FieldPath, Direction)],
) -> AggResult<ExtractedKeys> {
    let mut per_field = Vec::with_capacity(fields.len());
    let mut array_fields = 0;
    for (path, _) in fields {
        let (values, expanded) = field_values(doc, path);
        if expanded {
            array_fields += 1;
        }
        per_field.push(values);
    }
    if array_fields > 1 {
        return Err(AggError::parallel_arrays(index_name));
    }

    let mut keys = vec![Vec::with_capacity(fields.len())];
    for (values, (_, direction)) in per_field.into_iter().zip(fields) {
        let mut next = Vec::with_capacity(keys.len() * values.len());
        for prefix in &keys {
            for value in &values {
                let mut key: Vec<KeyPart> = prefix.clone();
                key.push(KeyPart::value(value.clone(), *direction));
                next.push(key);
            }
        }
        keys = next;
    }

    Ok(ExtractedKeys {
        keys: keys.into_iter().map(IndexKey).collect(),
        multikey: array_fields > 0,
    })
}
