//! Date part extraction (UTC only)

use chrono::{Datelike, Timelike};

use crate::errors::{AggError, AggResult};
use crate::value::Value;

/// Date component operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    DayOfMonth,
    Hour,
    Minute,
    Second,
    Millisecond,
    DayOfYear,
    /// 1 = Sunday .. 7 = Saturday
    DayOfWeek,
    /// Week of the year, weeks starting on Sunday (0..=53)
    Week,
    IsoWeekYear,
    IsoWeek,
    /// 1 = Monday .. 7 = Sunday
    IsoDayOfWeek,
}

impl DatePart {
    pub fn from_operator(name: &str) -> Option<Self> {
        Some(match name {
            "$year" => DatePart::Year,
            "$month" => DatePart::Month,
            "$dayOfMonth" => DatePart::DayOfMonth,
            "$hour" => DatePart::Hour,
            "$minute" => DatePart::Minute,
            "$second" => DatePart::Second,
            "$millisecond" => DatePart::Millisecond,
            "$dayOfYear" => DatePart::DayOfYear,
            "$dayOfWeek" => DatePart::DayOfWeek,
            "$week" => DatePart::Week,
            "$isoWeekYear" => DatePart::IsoWeekYear,
            "$isoWeek" => DatePart::IsoWeek,
            "$isoDayOfWeek" => DatePart::IsoDayOfWeek,
            _ => return None,
        })
    }

    pub fn operator(&self) -> &'static str {
        match self {
            DatePart::Year => "$year",
            DatePart::Month => "$month",
            DatePart::DayOfMonth => "$dayOfMonth",
            DatePart::Hour => "$hour",
            DatePart::Minute => "$minute",
            DatePart::Second => "$second",
            DatePart::Millisecond => "$millisecond",
            DatePart::DayOfYear => "$dayOfYear",
            DatePart::DayOfWeek => "$dayOfWeek",
            DatePart::Week => "$week",
            DatePart::IsoWeekYear => "$isoWeekYear",
            DatePart::IsoWeek => "$isoWeek",
            DatePart::IsoDayOfWeek => "$isoDayOfWeek",
        }
    }
}

/// Extract `part` from a date value; Null and Missing yield Null
pub fn extract(part: DatePart, input: &Value) -> AggResult<Value> {
    let date = match input {
        Value::Null | Value::Missing => return Ok(Value::Null),
        Value::Date(d) => *d,
        other => {
            return Err(AggError::type_mismatch(format!(
                "{} requires a date, found {}",
                part.operator(),
                other.kind()
            )))
        }
    };

    let n: i64 = match part {
        DatePart::Year => date.year() as i64,
        DatePart::Month => date.month() as i64,
        DatePart::DayOfMonth => date.day() as i64,
        DatePart::Hour => date.hour() as i64,
        DatePart::Minute => date.minute() as i64,
        DatePart::Second => date.second() as i64,
        DatePart::Millisecond => (date.timestamp_subsec_millis() % 1000) as i64,
        DatePart::DayOfYear => date.ordinal() as i64,
        DatePart::DayOfWeek => date.weekday().number_from_sunday() as i64,
        DatePart::Week => {
            let ordinal0 = date.ordinal0() as i64;
            let weekday0 = date.weekday().num_days_from_sunday() as i64;
            (ordinal0 + 7 - weekday0) / 7
        }
        DatePart::IsoWeekYear => date.iso_week().year() as i64,
        DatePart::IsoWeek => date.iso_week().week() as i64,
        DatePart::IsoDayOfWeek => date.weekday().number_from_monday() as i64,
    };

    Ok(Value::Int32(n as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(Utc.with_ymd_and_hms(y, m, d, 13, 45, 30).unwrap())
    }

    #[test]
    fn test_calendar_parts() {
        let d = date(2021, 3, 14);
        assert_eq!(extract(DatePart::Year, &d).unwrap(), Value::Int32(2021));
        assert_eq!(extract(DatePart::Month, &d).unwrap(), Value::Int32(3));
        assert_eq!(extract(DatePart::DayOfMonth, &d).unwrap(), Value::Int32(14));
        assert_eq!(extract(DatePart::Hour, &d).unwrap(), Value::Int32(13));
        assert_eq!(extract(DatePart::Minute, &d).unwrap(), Value::Int32(45));
        assert_eq!(extract(DatePart::Second, &d).unwrap(), Value::Int32(30));
        assert_eq!(extract(DatePart::DayOfYear, &d).unwrap(), Value::Int32(73));
    }

    #[test]
    fn test_week_numbering() {
        // 2021-03-14 is a Sunday
        let d = date(2021, 3, 14);
        assert_eq!(extract(DatePart::DayOfWeek, &d).unwrap(), Value::Int32(1));
        assert_eq!(extract(DatePart::IsoDayOfWeek, &d).unwrap(), Value::Int32(7));
        assert_eq!(extract(DatePart::Week, &d).unwrap(), Value::Int32(11));
        assert_eq!(extract(DatePart::IsoWeek, &d).unwrap(), Value::Int32(10));
    }

    #[test]
    fn test_iso_week_year_crosses_boundary() {
        // 2021-01-01 belongs to ISO week 53 of 2020
        let d = date(2021, 1, 1);
        assert_eq!(extract(DatePart::IsoWeekYear, &d).unwrap(), Value::Int32(2020));
        assert_eq!(extract(DatePart::IsoWeek, &d).unwrap(), Value::Int32(53));
        assert_eq!(extract(DatePart::Week, &d).unwrap(), Value::Int32(0));
    }

    #[test]
    fn test_null_and_type_mismatch() {
        assert_eq!(extract(DatePart::Year, &Value::Missing).unwrap(), Value::Null);
        let err = extract(DatePart::Year, &Value::from("2020")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }
}
