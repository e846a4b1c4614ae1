//! Numeric promotion and checked arithmetic
//!
//! # Promotion
//!
//! Int32 → Int64 → Double → Decimal. A binary operation runs in the wider
//! of its operand kinds. Integer overflow widens the result instead of
//! wrapping: Int32 overflow yields Int64, Int64 overflow yields Double.
//!
//! A Double promoted into a decimal keeps its binary representation error
//! (`Decimal::from_f64_retain`); decimal results are exact only when every
//! operand already was a decimal.

use std::cmp::Ordering;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::errors::{AggError, AggResult};

use super::types::Value;

/// Numeric kinds ordered by promotion rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NumericKind {
    Int32,
    Int64,
    Double,
    Decimal,
}

/// A numeric value detached from [`Value`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(Decimal),
}

impl Number {
    pub fn from_value(value: &Value) -> Option<Number> {
        match value {
            Value::Int32(v) => Some(Number::Int32(*v)),
            Value::Int64(v) => Some(Number::Int64(*v)),
            Value::Double(v) => Some(Number::Double(*v)),
            Value::Decimal(v) => Some(Number::Decimal(*v)),
            _ => None,
        }
    }

    /// Narrowest integer representation of `v`
    pub fn from_i64(v: i64) -> Number {
        match i32::try_from(v) {
            Ok(small) => Number::Int32(small),
            Err(_) => Number::Int64(v),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Number::Int32(v) => Value::Int32(v),
            Number::Int64(v) => Value::Int64(v),
            Number::Double(v) => Value::Double(v),
            Number::Decimal(v) => Value::Decimal(v),
        }
    }

    pub fn kind(&self) -> NumericKind {
        match self {
            Number::Int32(_) => NumericKind::Int32,
            Number::Int64(_) => NumericKind::Int64,
            Number::Double(_) => NumericKind::Double,
            Number::Decimal(_) => NumericKind::Decimal,
        }
    }

    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int32(v) => v as f64,
            Number::Int64(v) => v as f64,
            Number::Double(v) => v,
            Number::Decimal(v) => v.to_f64().unwrap_or(f64::NAN),
        }
    }

    /// Decimal representation; `None` for NaN and infinities
    pub fn to_decimal(self) -> Option<Decimal> {
        match self {
            Number::Int32(v) => Some(Decimal::from(v)),
            Number::Int64(v) => Some(Decimal::from(v)),
            Number::Double(v) => Decimal::from_f64_retain(v),
            Number::Decimal(v) => Some(v),
        }
    }

    /// Value as i64 if it is integral and in range
    pub fn to_integral(self) -> Option<i64> {
        match self {
            Number::Int32(v) => Some(v as i64),
            Number::Int64(v) => Some(v),
            Number::Double(v) => {
                if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64
                {
                    Some(v as i64)
                } else {
                    None
                }
            }
            Number::Decimal(v) => {
                if v.fract().is_zero() {
                    v.to_i64()
                } else {
                    None
                }
            }
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int32(v) => v == 0,
            Number::Int64(v) => v == 0,
            Number::Double(v) => v == 0.0,
            Number::Decimal(v) => v.is_zero(),
        }
    }

    pub fn is_nan(self) -> bool {
        matches!(self, Number::Double(v) if v.is_nan())
    }

    pub fn add(self, rhs: Number) -> AggResult<Number> {
        self.combine(
            rhs,
            "$add",
            i32::checked_add,
            i64::checked_add,
            |a, b| a + b,
            Decimal::checked_add,
        )
    }

    pub fn sub(self, rhs: Number) -> AggResult<Number> {
        self.combine(
            rhs,
            "$subtract",
            i32::checked_sub,
            i64::checked_sub,
            |a, b| a - b,
            Decimal::checked_sub,
        )
    }

    pub fn mul(self, rhs: Number) -> AggResult<Number> {
        self.combine(
            rhs,
            "$multiply",
            i32::checked_mul,
            i64::checked_mul,
            |a, b| a * b,
            Decimal::checked_mul,
        )
    }

    /// Division; integer operands produce a Double
    pub fn div(self, rhs: Number) -> AggResult<Number> {
        if rhs.is_zero() {
            return Err(AggError::divide_by_zero("$divide"));
        }
        if self.kind().max(rhs.kind()) == NumericKind::Decimal {
            if let (Some(a), Some(b)) = (self.to_decimal(), rhs.to_decimal()) {
                return a
                    .checked_div(b)
                    .map(Number::Decimal)
                    .ok_or_else(|| AggError::overflow("$divide"));
            }
        }
        Ok(Number::Double(self.to_f64() / rhs.to_f64()))
    }

    /// Remainder with the sign of the dividend
    pub fn rem(self, rhs: Number) -> AggResult<Number> {
        if rhs.is_zero() {
            return Err(AggError::divide_by_zero("$mod"));
        }
        self.combine(
            rhs,
            "$mod",
            i32::checked_rem,
            i64::checked_rem,
            |a, b| a % b,
            Decimal::checked_rem,
        )
    }

    pub fn abs(self) -> Number {
        match self {
            Number::Int32(v) => match v.checked_abs() {
                Some(a) => Number::Int32(a),
                None => Number::Int64((v as i64).abs()),
            },
            Number::Int64(v) => match v.checked_abs() {
                Some(a) => Number::Int64(a),
                None => Number::Double((v as f64).abs()),
            },
            Number::Double(v) => Number::Double(v.abs()),
            Number::Decimal(v) => Number::Decimal(v.abs()),
        }
    }

    /// Numeric comparison across kinds; NaN sorts below every other number
    pub fn cmp_numeric(self, other: Number) -> Ordering {
        if let (Some(a), Some(b)) = (self.exact_int(), other.exact_int()) {
            return a.cmp(&b);
        }
        if self.kind() == NumericKind::Decimal || other.kind() == NumericKind::Decimal {
            if let (Some(a), Some(b)) = (self.to_decimal(), other.to_decimal()) {
                return a.cmp(&b);
            }
        }
        let (a, b) = (self.to_f64(), other.to_f64());
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        }
    }

    fn exact_int(self) -> Option<i64> {
        match self {
            Number::Int32(v) => Some(v as i64),
            Number::Int64(v) => Some(v),
            _ => None,
        }
    }

    fn combine(
        self,
        rhs: Number,
        operator: &str,
        op32: fn(i32, i32) -> Option<i32>,
        op64: fn(i64, i64) -> Option<i64>,
        opf: fn(f64, f64) -> f64,
        opd: fn(Decimal, Decimal) -> Option<Decimal>,
    ) -> AggResult<Number> {
        match self.kind().max(rhs.kind()) {
            NumericKind::Int32 | NumericKind::Int64 => {
                if let (Number::Int32(a), Number::Int32(b)) = (self, rhs) {
                    if let Some(r) = op32(a, b) {
                        return Ok(Number::Int32(r));
                    }
                }
                let a = self.exact_int().unwrap_or_default();
                let b = rhs.exact_int().unwrap_or_default();
                Ok(match op64(a, b) {
                    Some(r) => Number::Int64(r),
                    None => Number::Double(opf(a as f64, b as f64)),
                })
            }
            NumericKind::Double => Ok(Number::Double(opf(self.to_f64(), rhs.to_f64()))),
            NumericKind::Decimal => match (self.to_decimal(), rhs.to_decimal()) {
                (Some(a), Some(b)) => opd(a, b)
                    .map(Number::Decimal)
                    .ok_or_else(|| AggError::overflow(operator)),
                _ => Ok(Number::Double(opf(self.to_f64(), rhs.to_f64()))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use std::str::FromStr;

    #[test]
    fn test_int32_overflow_widens_to_int64() {
        let r = Number::Int32(i32::MAX).add(Number::Int32(1)).unwrap();
        assert_eq!(r, Number::Int64(i32::MAX as i64 + 1));
    }

    #[test]
    fn test_int64_overflow_widens_to_double() {
        let r = Number::Int64(i64::MAX).add(Number::Int32(1)).unwrap();
        assert_eq!(r.kind(), NumericKind::Double);
    }

    #[test]
    fn test_mixed_promotes_to_wider_kind() {
        let r = Number::Int32(2).mul(Number::Double(1.5)).unwrap();
        assert_eq!(r, Number::Double(3.0));
        let r = Number::Int64(2).add(Number::Int32(3)).unwrap();
        assert_eq!(r, Number::Int64(5));
    }

    #[test]
    fn test_double_subtraction_keeps_binary_error() {
        let r = Number::Double(0.3).sub(Number::Double(0.1)).unwrap();
        assert_eq!(r, Number::Double(0.19999999999999998));
    }

    #[test]
    fn test_decimal_subtraction_is_exact() {
        let a = Decimal::from_str("0.3").unwrap();
        let b = Decimal::from_str("0.1").unwrap();
        let r = Number::Decimal(a).sub(Number::Decimal(b)).unwrap();
        assert_eq!(r, Number::Decimal(Decimal::from_str("0.2").unwrap()));
    }

    #[test]
    fn test_double_promoted_to_decimal_carries_error() {
        let a = Decimal::from_str("0.3").unwrap();
        let r = Number::Decimal(a).sub(Number::Double(0.1)).unwrap();
        assert_ne!(r, Number::Decimal(Decimal::from_str("0.2").unwrap()));
    }

    #[test]
    fn test_integer_division_yields_double() {
        let r = Number::Int32(7).div(Number::Int32(2)).unwrap();
        assert_eq!(r, Number::Double(3.5));
    }

    #[test]
    fn test_divide_by_zero() {
        let err = Number::Int32(1).div(Number::Double(0.0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DivideByZero);
        let err = Number::Int32(1).rem(Number::Int32(0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DivideByZero);
    }

    #[test]
    fn test_rem_keeps_integer_kind() {
        assert_eq!(Number::Int32(7).rem(Number::Int32(3)).unwrap(), Number::Int32(1));
        assert_eq!(
            Number::Int32(i32::MIN).rem(Number::Int32(-1)).unwrap(),
            Number::Int64(0)
        );
    }

    #[test]
    fn test_cmp_across_kinds() {
        assert_eq!(
            Number::Int32(1).cmp_numeric(Number::Double(1.0)),
            Ordering::Equal
        );
        assert_eq!(
            Number::Double(f64::NAN).cmp_numeric(Number::Int64(i64::MIN)),
            Ordering::Less
        );
        assert_eq!(
            Number::Decimal(Decimal::from_str("2.5").unwrap()).cmp_numeric(Number::Int32(2)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_to_integral() {
        assert_eq!(Number::Double(4.0).to_integral(), Some(4));
        assert_eq!(Number::Double(4.5).to_integral(), None);
        assert_eq!(
            Number::Decimal(Decimal::from_str("12.00").unwrap()).to_integral(),
            Some(12)
        );
    }
}
