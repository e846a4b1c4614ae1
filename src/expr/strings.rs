//! String operators; lengths and offsets count Unicode code points

use crate::errors::{AggError, AggResult};
use crate::value::Value;

use super::ast::TrimSide;
use super::conversion::{format_double_text, text_form};

/// Integral argument helper shared by string and array operators
pub(crate) fn integral_arg(operator: &str, what: &str, value: &Value) -> AggResult<i64> {
    value.as_i64().ok_or_else(|| {
        AggError::type_mismatch(format!(
            "{} requires an integral {}, found {}",
            operator,
            what,
            value.kind()
        ))
    })
}

/// Join the text forms of every argument.
///
/// Null and missing arguments are errors; wrap them in `$ifNull` to supply
/// a default.
pub fn concat(args: &[Value]) -> AggResult<Value> {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::Null | Value::Missing => {
                return Err(AggError::type_mismatch(format!(
                    "$concat argument is {}",
                    arg.kind()
                )))
            }
            other => match text_form(other) {
                Some(text) => out.push_str(&text),
                None => {
                    return Err(AggError::type_mismatch(format!(
                        "$concat cannot convert {} to a string",
                        other.kind()
                    )))
                }
            },
        }
    }
    Ok(Value::String(out))
}

fn case_input(operator: &str, value: &Value) -> AggResult<String> {
    match value {
        Value::Null | Value::Missing => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Int32(v) => Ok(v.to_string()),
        Value::Int64(v) => Ok(v.to_string()),
        Value::Double(v) => Ok(format_double_text(*v)),
        Value::Decimal(d) => Ok(d.to_string()),
        other => Err(AggError::type_mismatch(format!(
            "{} requires a string, found {}",
            operator,
            other.kind()
        ))),
    }
}

pub fn to_upper(value: &Value) -> AggResult<Value> {
    Ok(Value::String(case_input("$toUpper", value)?.to_uppercase()))
}

pub fn to_lower(value: &Value) -> AggResult<Value> {
    Ok(Value::String(case_input("$toLower", value)?.to_lowercase()))
}

pub fn substr_cp(input: &Value, start: &Value, length: &Value) -> AggResult<Value> {
    let text = case_input("$substrCP", input)?;
    let start = integral_arg("$substrCP", "starting index", start)?;
    let length = integral_arg("$substrCP", "length", length)?;
    if start < 0 || length < 0 {
        return Err(AggError::type_mismatch(
            "$substrCP requires non-negative index and length",
        ));
    }
    Ok(Value::String(
        text.chars()
            .skip(start as usize)
            .take(length as usize)
            .collect(),
    ))
}

pub fn str_len_cp(value: &Value) -> AggResult<Value> {
    match value {
        Value::String(s) => Ok(Value::Int32(s.chars().count() as i32)),
        other => Err(AggError::type_mismatch(format!(
            "$strLenCP requires a string, found {}",
            other.kind()
        ))),
    }
}

pub fn trim(side: TrimSide, input: &Value, chars: Option<&Value>) -> AggResult<Value> {
    let text = match input {
        Value::Null | Value::Missing => return Ok(Value::Null),
        Value::String(s) => s,
        other => {
            return Err(AggError::type_mismatch(format!(
                "$trim requires a string input, found {}",
                other.kind()
            )))
        }
    };
    let set: Option<Vec<char>> = match chars {
        None => None,
        Some(Value::Null) | Some(Value::Missing) => return Ok(Value::Null),
        Some(Value::String(s)) => Some(s.chars().collect()),
        Some(other) => {
            return Err(AggError::type_mismatch(format!(
                "$trim requires a string for chars, found {}",
                other.kind()
            )))
        }
    };
    let strip = |c: char| match &set {
        Some(set) => set.contains(&c),
        None => c.is_whitespace() || c == '\0',
    };
    let trimmed = match side {
        TrimSide::Both => text.trim_matches(strip),
        TrimSide::Start => text.trim_start_matches(strip),
        TrimSide::End => text.trim_end_matches(strip),
    };
    Ok(Value::String(trimmed.to_string()))
}
