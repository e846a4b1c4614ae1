//! Encoding boundary: extended JSON and checksummed frames
//!
//! Canonical extended JSON keeps every numeric subtype distinct:
//!
//! ```text
//! {"$numberInt": "5"}  {"$numberLong": "5"}  {"$numberDouble": "5.0"}
//! {"$numberDecimal": "0.2"}  {"$date": {"$numberLong": "1577836800000"}}
//! {"$oid": "5f1d7a3e..."}  {"$geoPoint": [lon, lat]}
//! ```
//!
//! Relaxed input accepts plain JSON: integers become Int32 (Int64 when out of
//! range), other numbers become Double.
//!
//! Frame format:
//!
//! ```text
//! +------------------+
//! | Payload Length   | (u32 LE)
//! +------------------+
//! | Payload          | (canonical extended JSON, UTF-8)
//! +------------------+
//! | Checksum         | (u32 LE, CRC32 of length + payload)
//! +------------------+
//! ```

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use crc32fast::Hasher;
use rust_decimal::Decimal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Number as JsonNumber, Value as Json};
use thiserror::Error;

use super::document::Document;
use super::types::{GeoPoint, ObjectId, Value};

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {kind} value: {reason}")]
    InvalidExtended { kind: &'static str, reason: String },

    #[error("expected a document, found {0}")]
    NotADocument(String),

    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("frame checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

/// Output flavour for [`to_json`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonMode {
    /// Every numeric subtype and date is wrapped
    Canonical,
    /// Finite numbers are plain JSON numbers, dates are ISO-8601 strings
    Relaxed,
}

const FRAME_HEADER: usize = 4;
const FRAME_TRAILER: usize = 4;

fn invalid(kind: &'static str, reason: impl Into<String>) -> CodecError {
    CodecError::InvalidExtended {
        kind,
        reason: reason.into(),
    }
}

/// Decode an extended JSON value
pub fn from_json(json: &Json) -> Result<Value, CodecError> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Boolean(*b)),
        Json::Number(n) => Ok(decode_number(n)),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => items
            .iter()
            .map(from_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Json::Object(map) => {
            if map.len() == 1 {
                if let Some((key, inner)) = map.iter().next() {
                    if let Some(value) = decode_extended(key, inner)? {
                        return Ok(value);
                    }
                }
            }
            let mut doc = Document::with_capacity(map.len());
            for (key, inner) in map {
                doc.insert(key.clone(), from_json(inner)?);
            }
            Ok(Value::Document(doc))
        }
    }
}

/// Decode an extended JSON object into a document
pub fn document_from_json(json: &Json) -> Result<Document, CodecError> {
    match from_json(json)? {
        Value::Document(doc) => Ok(doc),
        other => Err(CodecError::NotADocument(other.kind().name().to_string())),
    }
}

/// Parse extended JSON text into a document
pub fn document_from_str(text: &str) -> Result<Document, CodecError> {
    let json: Json = serde_json::from_str(text)?;
    document_from_json(&json)
}

fn decode_number(n: &JsonNumber) -> Value {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => Value::Int32(small),
            Err(_) => Value::Int64(i),
        }
    } else {
        Value::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn decode_extended(key: &str, inner: &Json) -> Result<Option<Value>, CodecError> {
    let value = match key {
        "$numberInt" => {
            let s = expect_str(inner, "$numberInt")?;
            Value::Int32(
                s.parse()
                    .map_err(|_| invalid("$numberInt", format!("'{}' is not an int32", s)))?,
            )
        }
        "$numberLong" => {
            let s = expect_str(inner, "$numberLong")?;
            Value::Int64(
                s.parse()
                    .map_err(|_| invalid("$numberLong", format!("'{}' is not an int64", s)))?,
            )
        }
        "$numberDouble" => {
            let s = expect_str(inner, "$numberDouble")?;
            Value::Double(parse_double(s)?)
        }
        "$numberDecimal" => {
            let s = expect_str(inner, "$numberDecimal")?;
            Value::Decimal(parse_decimal(s).ok_or_else(|| {
                invalid("$numberDecimal", format!("'{}' is not a decimal", s))
            })?)
        }
        "$oid" => {
            let s = expect_str(inner, "$oid")?;
            Value::ObjectId(
                ObjectId::parse_hex(s)
                    .ok_or_else(|| invalid("$oid", format!("'{}' is not 24 hex digits", s)))?,
            )
        }
        "$date" => Value::Date(decode_date(inner)?),
        "$geoPoint" => {
            let point = match inner {
                Json::Array(items) if items.len() == 2 => {
                    match (items[0].as_f64(), items[1].as_f64()) {
                        (Some(lon), Some(lat)) => GeoPoint::checked(lon, lat),
                        _ => None,
                    }
                }
                _ => None,
            };
            Value::GeoPoint(
                point.ok_or_else(|| invalid("$geoPoint", "expected [longitude, latitude]"))?,
            )
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn expect_str<'a>(json: &'a Json, kind: &'static str) -> Result<&'a str, CodecError> {
    json.as_str()
        .ok_or_else(|| invalid(kind, "expected a string"))
}

fn parse_double(s: &str) -> Result<f64, CodecError> {
    match s {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => s
            .parse()
            .map_err(|_| invalid("$numberDouble", format!("'{}' is not a double", s))),
    }
}

/// Parse decimal text, accepting scientific notation
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

fn decode_date(inner: &Json) -> Result<DateTime<Utc>, CodecError> {
    match inner {
        Json::String(s) => parse_date(s).ok_or_else(|| invalid("$date", format!("'{}'", s))),
        Json::Number(n) => n
            .as_i64()
            .and_then(millis_to_date)
            .ok_or_else(|| invalid("$date", "milliseconds out of range")),
        Json::Object(map) => match map.get("$numberLong") {
            Some(Json::String(s)) => s
                .parse::<i64>()
                .ok()
                .and_then(millis_to_date)
                .ok_or_else(|| invalid("$date", format!("'{}'", s))),
            _ => Err(invalid("$date", "expected {\"$numberLong\": \"...\"}")),
        },
        _ => Err(invalid("$date", "expected a string or milliseconds")),
    }
}

/// Parse an RFC 3339 timestamp, or a zone-less `YYYY-MM-DD[THH:MM:SS]` as UTC
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn millis_to_date(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// ISO-8601 rendering with millisecond precision
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_double(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        format!("{:?}", v)
    }
}

/// Encode a value as extended JSON
pub fn to_json(value: &Value, mode: JsonMode) -> Json {
    match value {
        Value::Missing | Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Int32(v) => match mode {
            JsonMode::Canonical => json!({"$numberInt": v.to_string()}),
            JsonMode::Relaxed => json!(v),
        },
        Value::Int64(v) => match mode {
            JsonMode::Canonical => json!({"$numberLong": v.to_string()}),
            JsonMode::Relaxed => json!(v),
        },
        Value::Double(v) => match (mode, JsonNumber::from_f64(*v)) {
            (JsonMode::Relaxed, Some(n)) => Json::Number(n),
            _ => json!({"$numberDouble": format_double(*v)}),
        },
        Value::Decimal(d) => json!({"$numberDecimal": d.to_string()}),
        Value::String(s) => Json::String(s.clone()),
        Value::Date(d) => match mode {
            JsonMode::Canonical => {
                json!({"$date": {"$numberLong": d.timestamp_millis().to_string()}})
            }
            JsonMode::Relaxed => json!({"$date": format_date(d)}),
        },
        Value::ObjectId(id) => json!({"$oid": id.to_hex()}),
        Value::GeoPoint(p) => json!({"$geoPoint": [p.lon, p.lat]}),
        Value::Array(items) => Json::Array(items.iter().map(|v| to_json(v, mode)).collect()),
        Value::Document(doc) => document_to_json(doc, mode),
    }
}

/// Encode a document as extended JSON
pub fn document_to_json(doc: &Document, mode: JsonMode) -> Json {
    let mut map = Map::new();
    for (key, value) in doc.iter() {
        map.insert(key.clone(), to_json(value, mode));
    }
    Json::Object(map)
}

/// Encode a document into a checksummed frame
pub fn encode_frame(doc: &Document) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(&document_to_json(doc, JsonMode::Canonical))?;
    let length = (payload.len() as u32).to_le_bytes();

    let mut hasher = Hasher::new();
    hasher.update(&length);
    hasher.update(&payload);
    let checksum = hasher.finalize();

    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len() + FRAME_TRAILER);
    frame.extend_from_slice(&length);
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&checksum.to_le_bytes());
    Ok(frame)
}

/// Decode one frame from the front of `bytes`, returning the document and
/// the number of bytes consumed
pub fn decode_frame(bytes: &[u8]) -> Result<(Document, usize), CodecError> {
    if bytes.len() < FRAME_HEADER {
        return Err(CodecError::Truncated {
            needed: FRAME_HEADER,
            available: bytes.len(),
        });
    }
    let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let total = FRAME_HEADER + length + FRAME_TRAILER;
    if bytes.len() < total {
        return Err(CodecError::Truncated {
            needed: total,
            available: bytes.len(),
        });
    }

    let payload = &bytes[FRAME_HEADER..FRAME_HEADER + length];
    let trailer = &bytes[FRAME_HEADER + length..total];
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);

    let mut hasher = Hasher::new();
    hasher.update(&bytes[..FRAME_HEADER]);
    hasher.update(payload);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(CodecError::ChecksumMismatch { stored, computed });
    }

    let json: Json = serde_json::from_slice(payload)?;
    Ok((document_from_json(&json)?, total))
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_json(self, JsonMode::Canonical).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        from_json(&json).map_err(D::Error::custom)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        document_to_json(self, JsonMode::Canonical).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        document_from_json(&json).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relaxed_numbers() {
        let doc = document_from_json(&json!({"a": 5, "b": 5.0, "c": 9_000_000_000i64})).unwrap();
        assert_eq!(doc.get("a"), Some(&Value::Int32(5)));
        assert_eq!(doc.get("b"), Some(&Value::Double(5.0)));
        assert_eq!(doc.get("c"), Some(&Value::Int64(9_000_000_000)));
    }

    #[test]
    fn test_canonical_keeps_subtypes() {
        let doc = document_from_json(&json!({
            "i": {"$numberInt": "7"},
            "l": {"$numberLong": "7"},
            "d": {"$numberDouble": "7.0"},
            "m": {"$numberDecimal": "0.2"},
            "nan": {"$numberDouble": "NaN"}
        }))
        .unwrap();
        assert_eq!(doc.get("i"), Some(&Value::Int32(7)));
        assert_eq!(doc.get("l"), Some(&Value::Int64(7)));
        assert_eq!(doc.get("d"), Some(&Value::Double(7.0)));
        assert_eq!(
            doc.get("m"),
            Some(&Value::Decimal(Decimal::from_str("0.2").unwrap()))
        );
        assert!(matches!(doc.get("nan"), Some(Value::Double(v)) if v.is_nan()));

        let back = document_to_json(&doc, JsonMode::Canonical);
        assert_eq!(back["l"], json!({"$numberLong": "7"}));
        assert_eq!(back["nan"], json!({"$numberDouble": "NaN"}));
    }

    #[test]
    fn test_dates() {
        let v = from_json(&json!({"$date": "2020-01-01T00:00:00Z"})).unwrap();
        let expected = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(v, Value::Date(expected));

        let canonical = to_json(&v, JsonMode::Canonical);
        assert_eq!(canonical, json!({"$date": {"$numberLong": "1577836800000"}}));
        assert_eq!(from_json(&canonical).unwrap(), v);

        let relaxed = to_json(&v, JsonMode::Relaxed);
        assert_eq!(relaxed, json!({"$date": "2020-01-01T00:00:00.000Z"}));
    }

    #[test]
    fn test_invalid_extended_values() {
        assert!(from_json(&json!({"$numberInt": "abc"})).is_err());
        assert!(from_json(&json!({"$oid": "123"})).is_err());
        assert!(from_json(&json!({"$geoPoint": [500, 0]})).is_err());
    }

    #[test]
    fn test_operator_documents_are_plain_documents() {
        let v = from_json(&json!({"$match": {"a": 1}})).unwrap();
        assert!(matches!(v, Value::Document(ref d) if d.contains_key("$match")));
    }

    #[test]
    fn test_frame_roundtrip_and_corruption() {
        let doc = document_from_json(&json!({"name": "Max", "n": {"$numberLong": "3"}})).unwrap();
        let mut frame = encode_frame(&doc).unwrap();
        let (decoded, consumed) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(consumed, frame.len());

        let mid = frame.len() / 2;
        frame[mid] ^= 0xff;
        assert!(matches!(
            decode_frame(&frame),
            Err(CodecError::ChecksumMismatch { .. }) | Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let doc = document_from_json(&json!({"a": 1})).unwrap();
        let frame = encode_frame(&doc).unwrap();
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
