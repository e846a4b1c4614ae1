//! Array operators

use crate::errors::{AggError, AggResult};
use crate::value::{equal, Value};

use super::strings::integral_arg;

fn expect_array<'a>(operator: &str, value: &'a Value) -> AggResult<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| {
        AggError::type_mismatch(format!(
            "{} requires an array, found {}",
            operator,
            value.kind()
        ))
    })
}

pub fn size(value: &Value) -> AggResult<Value> {
    let items = expect_array("$size", value)?;
    Ok(match i32::try_from(items.len()) {
        Ok(n) => Value::Int32(n),
        Err(_) => Value::Int64(items.len() as i64),
    })
}

/// Element window shared by `$slice` expressions and projections.
///
/// With `skip = None`, a non-negative `n` takes the first `n` elements and
/// a negative `n` the last `|n|`. With `skip = Some(s)`, `n` elements are
/// taken from position `s`, a negative `s` counting from the end.
pub fn slice_window(len: usize, skip: Option<i64>, n: i64) -> (usize, usize) {
    let len_i = len as i64;
    match skip {
        None if n >= 0 => (0, n.min(len_i) as usize),
        None => {
            let start = (len_i + n).max(0);
            (start as usize, len)
        }
        Some(s) => {
            let start = if s < 0 { (len_i + s).max(0) } else { s.min(len_i) };
            let end = (start + n.max(0)).min(len_i);
            (start as usize, end as usize)
        }
    }
}

pub fn slice(args: &[Value]) -> AggResult<Value> {
    let array = &args[0];
    if array.is_nullish() {
        return Ok(Value::Null);
    }
    let items = expect_array("$slice", array)?;
    let (skip, n) = if args.len() == 3 {
        let n = integral_arg("$slice", "count", &args[2])?;
        if n <= 0 {
            return Err(AggError::type_mismatch(
                "$slice requires a positive count when a position is given",
            ));
        }
        (Some(integral_arg("$slice", "position", &args[1])?), n)
    } else {
        (None, integral_arg("$slice", "count", &args[1])?)
    };
    let (start, end) = slice_window(items.len(), skip, n);
    Ok(Value::Array(items[start..end].to_vec()))
}

pub fn array_elem_at(array: &Value, index: &Value) -> AggResult<Value> {
    if array.is_nullish() || index.is_nullish() {
        return Ok(Value::Null);
    }
    let items = expect_array("$arrayElemAt", array)?;
    let index = integral_arg("$arrayElemAt", "index", index)?;
    let resolved = if index < 0 {
        items.len() as i64 + index
    } else {
        index
    };
    if resolved < 0 {
        return Ok(Value::Missing);
    }
    Ok(items
        .get(resolved as usize)
        .cloned()
        .unwrap_or(Value::Missing))
}

pub fn contains(needle: &Value, haystack: &Value) -> AggResult<Value> {
    let items = expect_array("$in", haystack)?;
    Ok(Value::Boolean(items.iter().any(|item| equal(item, needle))))
}

pub fn is_array(value: &Value) -> Value {
    Value::Boolean(value.is_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    fn ints(xs: &[i32]) -> Value {
        Value::Array(xs.iter().map(|x| Value::Int32(*x)).collect())
    }

    #[test]
    fn test_size() {
        assert_eq!(size(&ints(&[1, 2, 3])).unwrap(), Value::Int32(3));
        assert_eq!(size(&Value::Missing).unwrap_err().code(), ErrorCode::TypeMismatch);
    }

    #[test]
    fn test_slice_head_tail_and_window() {
        let a = ints(&[1, 2, 3, 4, 5]);
        assert_eq!(slice(&[a.clone(), Value::Int32(2)]).unwrap(), ints(&[1, 2]));
        assert_eq!(slice(&[a.clone(), Value::Int32(-2)]).unwrap(), ints(&[4, 5]));
        assert_eq!(
            slice(&[a.clone(), Value::Int32(1), Value::Int32(2)]).unwrap(),
            ints(&[2, 3])
        );
        assert_eq!(
            slice(&[a.clone(), Value::Int32(-2), Value::Int32(5)]).unwrap(),
            ints(&[4, 5])
        );
        assert_eq!(slice(&[a.clone(), Value::Int32(10)]).unwrap(), a);
        assert!(slice(&[a, Value::Int32(0), Value::Int32(0)]).is_err());
    }

    #[test]
    fn test_array_elem_at() {
        let a = ints(&[1, 2, 3]);
        assert_eq!(array_elem_at(&a, &Value::Int32(0)).unwrap(), Value::Int32(1));
        assert_eq!(array_elem_at(&a, &Value::Int32(-1)).unwrap(), Value::Int32(3));
        assert_eq!(array_elem_at(&a, &Value::Int32(5)).unwrap(), Value::Missing);
        assert_eq!(array_elem_at(&a, &Value::Int32(-5)).unwrap(), Value::Missing);
    }

    #[test]
    fn test_contains() {
        assert_eq!(
            contains(&Value::Double(2.0), &ints(&[1, 2])).unwrap(),
            Value::Boolean(true)
        );
        assert!(contains(&Value::Int32(1), &Value::Int32(1)).is_err());
    }
}
