//! `$convert` and its shorthand operators
//!
//! Null and Missing inputs never reach [`convert`]; the evaluator maps them
//! to `onNull` (or Null) first.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::errors::{AggError, AggResult};
use crate::value::codec::{format_date, millis_to_date, parse_date, parse_decimal};
use crate::value::{Number, ObjectId, Value, ValueKind};

/// Conversion target kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertTarget {
    Double,
    Int,
    Long,
    Decimal,
    String,
    Bool,
    Date,
    ObjectId,
}

impl ConvertTarget {
    /// Parse a target given by alias (`"double"`) or numeric type code
    pub fn parse(value: &Value) -> AggResult<Self> {
        let kind = match value {
            Value::String(name) => ValueKind::from_name(name),
            other => other.as_i64().and_then(ValueKind::from_code),
        };
        let target = match kind {
            Some(ValueKind::Double) => ConvertTarget::Double,
            Some(ValueKind::Int32) => ConvertTarget::Int,
            Some(ValueKind::Int64) => ConvertTarget::Long,
            Some(ValueKind::Decimal) => ConvertTarget::Decimal,
            Some(ValueKind::String) => ConvertTarget::String,
            Some(ValueKind::Boolean) => ConvertTarget::Bool,
            Some(ValueKind::Date) => ConvertTarget::Date,
            Some(ValueKind::ObjectId) => ConvertTarget::ObjectId,
            _ => {
                return Err(AggError::invalid_stage(format!(
                    "$convert: unsupported target type {}",
                    value
                )))
            }
        };
        Ok(target)
    }

    /// Target for `$toDouble`, `$toInt`, ... shorthand operators
    pub fn from_sugar(operator: &str) -> Option<Self> {
        Some(match operator {
            "$toDouble" => ConvertTarget::Double,
            "$toInt" => ConvertTarget::Int,
            "$toLong" => ConvertTarget::Long,
            "$toDecimal" => ConvertTarget::Decimal,
            "$toString" => ConvertTarget::String,
            "$toBool" => ConvertTarget::Bool,
            "$toDate" => ConvertTarget::Date,
            "$toObjectId" => ConvertTarget::ObjectId,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConvertTarget::Double => "double",
            ConvertTarget::Int => "int",
            ConvertTarget::Long => "long",
            ConvertTarget::Decimal => "decimal",
            ConvertTarget::String => "string",
            ConvertTarget::Bool => "bool",
            ConvertTarget::Date => "date",
            ConvertTarget::ObjectId => "objectId",
        }
    }
}

fn failed(input: &Value, target: ConvertTarget, reason: &str) -> AggError {
    AggError::conversion_failed(format!(
        "cannot convert {} ({}) to {}: {}",
        input,
        input.kind(),
        target.name(),
        reason
    ))
}

/// Convert a non-null value to `target`
pub fn convert(input: &Value, target: ConvertTarget) -> AggResult<Value> {
    match target {
        ConvertTarget::Double => to_double(input).map(Value::Double),
        ConvertTarget::Int => {
            let wide = to_long(input, target)?;
            i32::try_from(wide)
                .map(Value::Int32)
                .map_err(|_| failed(input, target, "value out of int32 range"))
        }
        ConvertTarget::Long => to_long(input, target).map(Value::Int64),
        ConvertTarget::Decimal => to_decimal(input).map(Value::Decimal),
        ConvertTarget::String => to_string(input).map(Value::String),
        ConvertTarget::Bool => to_bool(input).map(Value::Boolean),
        ConvertTarget::Date => to_date(input).map(Value::Date),
        ConvertTarget::ObjectId => match input {
            Value::ObjectId(id) => Ok(Value::ObjectId(*id)),
            Value::String(s) => ObjectId::parse_hex(s)
                .map(Value::ObjectId)
                .ok_or_else(|| failed(input, target, "expected 24 hexadecimal digits")),
            _ => Err(failed(input, target, "unsupported input type")),
        },
    }
}

fn to_double(input: &Value) -> AggResult<f64> {
    let target = ConvertTarget::Double;
    match input {
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Date(d) => Ok(d.timestamp_millis() as f64),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" | "inf" => Ok(f64::INFINITY),
            "-Infinity" | "-inf" => Ok(f64::NEG_INFINITY),
            text => text
                .parse::<f64>()
                .map_err(|_| failed(input, target, "not a numeric string")),
        },
        other => Number::from_value(other)
            .map(Number::to_f64)
            .ok_or_else(|| failed(input, target, "unsupported input type")),
    }
}

fn to_long(input: &Value, target: ConvertTarget) -> AggResult<i64> {
    match input {
        Value::Boolean(b) => Ok(*b as i64),
        Value::Int32(v) => Ok(*v as i64),
        Value::Int64(v) => Ok(*v),
        Value::Double(v) => {
            if !v.is_finite() {
                return Err(failed(input, target, "non-finite double"));
            }
            let truncated = v.trunc();
            if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
                return Err(failed(input, target, "value out of range"));
            }
            Ok(truncated as i64)
        }
        Value::Decimal(d) => Number::Decimal(d.trunc())
            .to_integral()
            .ok_or_else(|| failed(input, target, "value out of range")),
        Value::Date(d) if target == ConvertTarget::Long => Ok(d.timestamp_millis()),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| failed(input, target, "not an integer string")),
        _ => Err(failed(input, target, "unsupported input type")),
    }
}

fn to_decimal(input: &Value) -> AggResult<Decimal> {
    let target = ConvertTarget::Decimal;
    match input {
        Value::Boolean(b) => Ok(Decimal::from(*b as i32)),
        Value::Date(d) => Ok(Decimal::from(d.timestamp_millis())),
        Value::String(s) => {
            parse_decimal(s).ok_or_else(|| failed(input, target, "not a decimal string"))
        }
        other => Number::from_value(other)
            .and_then(Number::to_decimal)
            .ok_or_else(|| failed(input, target, "unsupported input type")),
    }
}

fn to_string(input: &Value) -> AggResult<String> {
    text_form(input).ok_or_else(|| failed(input, ConvertTarget::String, "unsupported input type"))
}

/// Text form of a scalar; None for null, missing and composite values
pub(crate) fn text_form(input: &Value) -> Option<String> {
    match input {
        Value::String(s) => Some(s.clone()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Int32(v) => Some(v.to_string()),
        Value::Int64(v) => Some(v.to_string()),
        Value::Double(v) => Some(format_double_text(*v)),
        Value::Decimal(d) => Some(d.to_string()),
        Value::Date(d) => Some(format_date(d)),
        Value::ObjectId(id) => Some(id.to_hex()),
        _ => None,
    }
}

/// Shortest decimal text for a double (`5` for 5.0, `88.5` for 88.5)
pub fn format_double_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        format!("{}", v)
    }
}

fn to_bool(input: &Value) -> AggResult<bool> {
    match input {
        Value::Boolean(b) => Ok(*b),
        Value::String(_) | Value::Date(_) | Value::ObjectId(_) => Ok(true),
        other => Number::from_value(other)
            .map(|n| !n.is_zero())
            .ok_or_else(|| failed(input, ConvertTarget::Bool, "unsupported input type")),
    }
}

fn to_date(input: &Value) -> AggResult<DateTime<Utc>> {
    let target = ConvertTarget::Date;
    match input {
        Value::Date(d) => Ok(*d),
        Value::String(s) => {
            parse_date(s).ok_or_else(|| failed(input, target, "not a recognised date string"))
        }
        Value::ObjectId(id) => Ok(id.timestamp()),
        Value::Int64(_) | Value::Double(_) | Value::Decimal(_) | Value::Int32(_) => {
            let millis = Number::from_value(input)
                .map(|n| n.to_f64())
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
                .ok_or_else(|| failed(input, target, "non-finite milliseconds"))?;
            millis_to_date(millis).ok_or_else(|| failed(input, target, "out of range"))
        }
        _ => Err(failed(input, target, "unsupported input type")),
    }
}
