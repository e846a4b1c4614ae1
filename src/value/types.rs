//! The tagged value type and its scalar helpers

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::document::Document;

/// A 12-byte object identifier.
///
/// The first four bytes are the creation time in seconds since the epoch
/// (big-endian) so identifiers sort by creation second; the remaining
/// eight bytes are random.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        let seconds = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let random = Uuid::new_v4();
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..].copy_from_slice(&random.as_bytes()[..8]);
        ObjectId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Parse a 24 character hexadecimal string
    pub fn parse_hex(s: &str) -> Option<Self> {
        if s.len() != 24 || !s.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(ObjectId(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Creation time embedded in the identifier
    pub fn timestamp(&self) -> DateTime<Utc> {
        let seconds = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Utc.timestamp_opt(seconds as i64, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId(\"{}\")", self.to_hex())
    }
}

/// A WGS-84 point, longitude first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Construct a point, rejecting out-of-range coordinates
    pub fn checked(lon: f64, lat: f64) -> Option<Self> {
        if lon.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lon)
            && (-90.0..=90.0).contains(&lat)
        {
            Some(Self { lon, lat })
        } else {
            None
        }
    }

    /// Extract a point from a GeoPoint value, a GeoJSON `Point` document or
    /// a legacy `[lon, lat]` pair
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::GeoPoint(p) => Some(*p),
            Value::Array(items) if items.len() == 2 => {
                let lon = items[0].as_f64()?;
                let lat = items[1].as_f64()?;
                Self::checked(lon, lat)
            }
            Value::Document(doc) => {
                match doc.get("type") {
                    Some(Value::String(t)) if t == "Point" => {}
                    _ => return None,
                }
                Self::from_value(doc.get("coordinates")?)
            }
            _ => None,
        }
    }
}

/// Value kinds, used for `$type` and error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Missing,
    Null,
    Boolean,
    Int32,
    Int64,
    Double,
    Decimal,
    String,
    Date,
    ObjectId,
    Array,
    Document,
    GeoPoint,
}

impl ValueKind {
    /// Alias used by `$type` and `$convert`
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Missing => "missing",
            ValueKind::Null => "null",
            ValueKind::Boolean => "bool",
            ValueKind::Int32 => "int",
            ValueKind::Int64 => "long",
            ValueKind::Double => "double",
            ValueKind::Decimal => "decimal",
            ValueKind::String => "string",
            ValueKind::Date => "date",
            ValueKind::ObjectId => "objectId",
            ValueKind::Array => "array",
            ValueKind::Document => "object",
            ValueKind::GeoPoint => "geoPoint",
        }
    }

    /// Numeric `$type` code; GeoPoint has no conventional code and uses 128
    pub fn type_code(&self) -> Option<i32> {
        match self {
            ValueKind::Missing => None,
            ValueKind::Double => Some(1),
            ValueKind::String => Some(2),
            ValueKind::Document => Some(3),
            ValueKind::Array => Some(4),
            ValueKind::ObjectId => Some(7),
            ValueKind::Boolean => Some(8),
            ValueKind::Date => Some(9),
            ValueKind::Null => Some(10),
            ValueKind::Int32 => Some(16),
            ValueKind::Int64 => Some(18),
            ValueKind::Decimal => Some(19),
            ValueKind::GeoPoint => Some(128),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "null" => ValueKind::Null,
            "bool" => ValueKind::Boolean,
            "int" => ValueKind::Int32,
            "long" => ValueKind::Int64,
            "double" => ValueKind::Double,
            "decimal" => ValueKind::Decimal,
            "string" => ValueKind::String,
            "date" => ValueKind::Date,
            "objectId" => ValueKind::ObjectId,
            "array" => ValueKind::Array,
            "object" => ValueKind::Document,
            "geoPoint" => ValueKind::GeoPoint,
            _ => return None,
        })
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => ValueKind::Double,
            2 => ValueKind::String,
            3 => ValueKind::Document,
            4 => ValueKind::Array,
            7 => ValueKind::ObjectId,
            8 => ValueKind::Boolean,
            9 => ValueKind::Date,
            10 => ValueKind::Null,
            16 => ValueKind::Int32,
            18 => ValueKind::Int64,
            19 => ValueKind::Decimal,
            128 => ValueKind::GeoPoint,
            _ => return None,
        })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueKind::Int32 | ValueKind::Int64 | ValueKind::Double | ValueKind::Decimal
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A document value.
///
/// `Missing` exists only during evaluation: it marks an absent field and is
/// never stored inside a [`Document`].
///
/// Derived equality is structural (`Int32(1) != Double(1.0)`); semantic
/// comparison lives in [`super::ordering`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Date(DateTime<Utc>),
    ObjectId(ObjectId),
    Array(Vec<Value>),
    Document(Document),
    GeoPoint(GeoPoint),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Missing => ValueKind::Missing,
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Double(_) => ValueKind::Double,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::String(_) => ValueKind::String,
            Value::Date(_) => ValueKind::Date,
            Value::ObjectId(_) => ValueKind::ObjectId,
            Value::Array(_) => ValueKind::Array,
            Value::Document(_) => ValueKind::Document,
            Value::GeoPoint(_) => ValueKind::GeoPoint,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or Missing
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Missing)
    }

    pub fn is_number(&self) -> bool {
        self.kind().is_numeric()
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Numeric value as f64 (decimals are rounded to the nearest double)
    pub fn as_f64(&self) -> Option<f64> {
        super::number::Number::from_value(self).map(|n| n.to_f64())
    }

    /// Numeric value as i64 when it is integral
    pub fn as_i64(&self) -> Option<i64> {
        super::number::Number::from_value(self).and_then(|n| n.to_integral())
    }

    /// Approximate in-memory footprint, used for blocking stage accounting
    pub fn approx_size(&self) -> usize {
        const BASE: usize = 16;
        match self {
            Value::String(s) => BASE + s.len(),
            Value::Array(items) => BASE + items.iter().map(Value::approx_size).sum::<usize>(),
            Value::Document(doc) => BASE + doc.approx_size(),
            Value::Decimal(_) => BASE + 16,
            _ => BASE,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = super::codec::to_json(self, super::codec::JsonMode::Relaxed);
        write!(f, "{}", json)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<GeoPoint> for Value {
    fn from(v: GeoPoint) -> Self {
        Value::GeoPoint(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}
