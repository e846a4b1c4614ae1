//! Arithmetic operators
//!
//! Any Null or Missing operand makes the result Null. Dates take part in
//! `$add` and `$subtract` as milliseconds since the epoch.

use chrono::Duration;

use crate::errors::{AggError, AggResult};
use crate::value::{Number, Value};

fn numeric(operator: &str, value: &Value) -> AggResult<Number> {
    Number::from_value(value).ok_or_else(|| {
        AggError::type_mismatch(format!(
            "{} only supports numeric types, found {}",
            operator,
            value.kind()
        ))
    })
}

fn millis(operator: &str, n: Number) -> AggResult<Duration> {
    let f = n.to_f64();
    if !f.is_finite() {
        return Err(AggError::type_mismatch(format!(
            "{}: cannot offset a date by a non-finite number",
            operator
        )));
    }
    Ok(Duration::milliseconds((f.round() as i64).max(-i64::MAX)))
}

pub fn add(args: &[Value]) -> AggResult<Value> {
    if args.iter().any(Value::is_nullish) {
        return Ok(Value::Null);
    }
    let mut date = None;
    let mut sum = Number::Int32(0);
    for arg in args {
        match arg {
            Value::Date(d) => {
                if date.is_some() {
                    return Err(AggError::type_mismatch("$add only supports one date operand"));
                }
                date = Some(*d);
            }
            other => sum = sum.add(numeric("$add", other)?)?,
        }
    }
    match date {
        Some(d) => d
            .checked_add_signed(millis("$add", sum)?)
            .map(Value::Date)
            .ok_or_else(|| AggError::type_mismatch("$add: date out of range")),
        None => Ok(sum.into_value()),
    }
}

pub fn subtract(lhs: &Value, rhs: &Value) -> AggResult<Value> {
    if lhs.is_nullish() || rhs.is_nullish() {
        return Ok(Value::Null);
    }
    match (lhs, rhs) {
        (Value::Date(a), Value::Date(b)) => {
            Ok(Value::Int64(a.timestamp_millis() - b.timestamp_millis()))
        }
        (Value::Date(a), other) => a
            .checked_sub_signed(millis("$subtract", numeric("$subtract", other)?)?)
            .map(Value::Date)
            .ok_or_else(|| AggError::type_mismatch("$subtract: date out of range")),
        (a, b) => Ok(numeric("$subtract", a)?
            .sub(numeric("$subtract", b)?)?
            .into_value()),
    }
}

pub fn multiply(args: &[Value]) -> AggResult<Value> {
    if args.iter().any(Value::is_nullish) {
        return Ok(Value::Null);
    }
    let mut product = Number::Int32(1);
    for arg in args {
        product = product.mul(numeric("$multiply", arg)?)?;
    }
    Ok(product.into_value())
}

pub fn divide(lhs: &Value, rhs: &Value) -> AggResult<Value> {
    if lhs.is_nullish() || rhs.is_nullish() {
        return Ok(Value::Null);
    }
    Ok(numeric("$divide", lhs)?
        .div(numeric("$divide", rhs)?)?
        .into_value())
}

pub fn modulo(lhs: &Value, rhs: &Value) -> AggResult<Value> {
    if lhs.is_nullish() || rhs.is_nullish() {
        return Ok(Value::Null);
    }
    Ok(numeric("$mod", lhs)?.rem(numeric("$mod", rhs)?)?.into_value())
}

pub fn abs(value: &Value) -> AggResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Null);
    }
    Ok(numeric("$abs", value)?.abs().into_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_add_numbers_and_dates() {
        assert_eq!(
            add(&[Value::Int32(1), Value::Int64(2), Value::Double(0.5)]).unwrap(),
            Value::Double(3.5)
        );
        let d = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            add(&[Value::Date(d), Value::Int32(1000)]).unwrap(),
            Value::Date(d + Duration::seconds(1))
        );
        assert_eq!(add(&[Value::Int32(1), Value::Null]).unwrap(), Value::Null);
        assert!(add(&[Value::Int32(1), Value::from("x")]).is_err());
    }

    #[test]
    fn test_subtract_dates() {
        let a = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            subtract(&Value::Date(a), &Value::Date(b)).unwrap(),
            Value::Int64(86_400_000)
        );
        assert_eq!(
            subtract(&Value::Date(a), &Value::Int32(86_400_000)).unwrap(),
            Value::Date(b)
        );
    }

    #[test]
    fn test_divide_rules() {
        assert_eq!(
            divide(&Value::Int32(1), &Value::Int32(4)).unwrap(),
            Value::Double(0.25)
        );
        let err = divide(&Value::Int32(1), &Value::Int32(0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DivideByZero);
        assert_eq!(divide(&Value::Missing, &Value::Int32(0)).unwrap(), Value::Null);
    }

    #[test]
    fn test_modulo_and_abs() {
        assert_eq!(modulo(&Value::Int32(10), &Value::Int32(3)).unwrap(), Value::Int32(1));
        assert_eq!(
            modulo(&Value::Int32(10), &Value::Int32(0)).unwrap_err().code(),
            ErrorCode::DivideByZero
        );
        assert_eq!(abs(&Value::Int32(-4)).unwrap(), Value::Int32(4));
    }

    #[test]
    fn test_multiply_overflow_widens() {
        assert_eq!(
            multiply(&[Value::Int32(i32::MAX), Value::Int32(2)]).unwrap(),
            Value::Int64(i32::MAX as i64 * 2)
        );
    }
}
