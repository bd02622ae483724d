//! Conversion between MySQL wire values and `UniversalValue`.
//!
//! The column's translated type decides how a raw value is read: the text
//! protocol returns most values as bytes, the binary protocol as typed
//! variants, and both must land on the same `UniversalValue`.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::Value;
use rust_decimal::Decimal;
use std::str::FromStr;

use sync_core::{SyncError, UniversalType, UniversalValue};

/// Convert one MySQL value for a column of type `ty`.
pub fn from_mysql(value: &Value, ty: &UniversalType, column: &str) -> Result<UniversalValue, SyncError> {
    let mismatch = || {
        SyncError::Data(format!(
            "column '{column}': cannot read MySQL value {value:?} as {ty}"
        ))
    };

    if let Value::NULL = value {
        return Ok(UniversalValue::Null);
    }

    let converted = match ty {
        UniversalType::Bool => match value {
            Value::Int(i) => UniversalValue::Bool(*i != 0),
            Value::UInt(u) => UniversalValue::Bool(*u != 0),
            // BIT(1) arrives as a single raw byte; TINYINT in text form.
            Value::Bytes(bytes) => match text(bytes) {
                Some("0") => UniversalValue::Bool(false),
                Some("1") => UniversalValue::Bool(true),
                _ => UniversalValue::Bool(bytes.iter().any(|b| *b != 0)),
            },
            _ => return Err(mismatch()),
        },

        UniversalType::Int16 | UniversalType::Int32 | UniversalType::Int64 => match value {
            Value::Int(i) => UniversalValue::Int64(*i),
            Value::UInt(u) => i64::try_from(*u)
                .map(UniversalValue::Int64)
                .map_err(|_| mismatch())?,
            Value::Bytes(bytes) => text(bytes)
                .and_then(|s| s.parse::<i64>().ok())
                .map(UniversalValue::Int64)
                .ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        },

        UniversalType::Float32 | UniversalType::Float64 => match value {
            Value::Float(f) => UniversalValue::Float64(f64::from(*f)),
            Value::Double(d) => UniversalValue::Float64(*d),
            Value::Int(i) => UniversalValue::Float64(*i as f64),
            Value::Bytes(bytes) => text(bytes)
                .and_then(|s| s.parse::<f64>().ok())
                .map(UniversalValue::Float64)
                .ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        },

        UniversalType::Decimal { .. } => match value {
            Value::Int(i) => UniversalValue::Decimal(Decimal::from(*i)),
            Value::UInt(u) => UniversalValue::Decimal(Decimal::from(*u)),
            Value::Double(d) => Decimal::try_from(*d)
                .map(UniversalValue::Decimal)
                .map_err(|_| mismatch())?,
            Value::Bytes(bytes) => text(bytes)
                .and_then(|s| Decimal::from_str(s).ok())
                .map(UniversalValue::Decimal)
                .ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        },

        UniversalType::Char { .. } | UniversalType::VarChar { .. } | UniversalType::Text => {
            match value {
                Value::Bytes(bytes) => {
                    UniversalValue::Text(String::from_utf8_lossy(bytes).into_owned())
                }
                Value::Int(i) => UniversalValue::Text(i.to_string()),
                Value::UInt(u) => UniversalValue::Text(u.to_string()),
                _ => return Err(mismatch()),
            }
        }

        UniversalType::Bytes => match value {
            Value::Bytes(bytes) => UniversalValue::Bytes(bytes.clone()),
            _ => return Err(mismatch()),
        },

        UniversalType::Date => match value {
            Value::Date(0, 0, 0, ..) => return Ok(zero_date(column)),
            Value::Date(y, m, d, ..) => {
                NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*m), u32::from(*d))
                    .map(UniversalValue::Date)
                    .ok_or_else(mismatch)?
            }
            Value::Bytes(bytes) => match text(bytes) {
                Some(s) if s.starts_with("0000-00-00") => return Ok(zero_date(column)),
                Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(UniversalValue::Date)
                    .map_err(|_| mismatch())?,
                None => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        },

        UniversalType::Time => match value {
            Value::Time(false, 0, h, m, s, us) => NaiveTime::from_hms_micro_opt(
                u32::from(*h),
                u32::from(*m),
                u32::from(*s),
                *us,
            )
            .map(UniversalValue::Time)
            .ok_or_else(mismatch)?,
            // Negative or multi-day durations do not fit a time of day.
            Value::Time(..) => return Err(mismatch()),
            Value::Bytes(bytes) => text(bytes)
                .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok())
                .map(UniversalValue::Time)
                .ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        },

        UniversalType::Timestamp => match value {
            Value::Date(0, 0, 0, ..) => return Ok(zero_date(column)),
            Value::Date(y, mo, d, h, mi, s, us) => {
                NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*mo), u32::from(*d))
                    .and_then(|date| {
                        date.and_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us)
                    })
                    .map(UniversalValue::Timestamp)
                    .ok_or_else(mismatch)?
            }
            Value::Bytes(bytes) => match text(bytes) {
                Some(s) if s.starts_with("0000-00-00") => return Ok(zero_date(column)),
                Some(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .map(UniversalValue::Timestamp)
                    .map_err(|_| mismatch())?,
                None => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        },
    };
    Ok(converted)
}

/// Convert a value into a statement parameter.
pub fn to_mysql(value: &UniversalValue) -> Value {
    match value {
        UniversalValue::Null => Value::NULL,
        UniversalValue::Bool(b) => Value::Int(i64::from(*b)),
        UniversalValue::Int64(i) => Value::Int(*i),
        UniversalValue::Float64(f) => Value::Double(*f),
        UniversalValue::Decimal(d) => Value::Bytes(d.to_string().into_bytes()),
        UniversalValue::Text(s) => Value::Bytes(s.clone().into_bytes()),
        UniversalValue::Bytes(b) => Value::Bytes(b.clone()),
        UniversalValue::Date(d) => Value::Date(
            d.year() as u16,
            d.month() as u8,
            d.day() as u8,
            0,
            0,
            0,
            0,
        ),
        UniversalValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        UniversalValue::Timestamp(ts) => Value::Date(
            ts.year() as u16,
            ts.month() as u8,
            ts.day() as u8,
            ts.hour() as u8,
            ts.minute() as u8,
            ts.second() as u8,
            ts.nanosecond() / 1_000,
        ),
    }
}

fn text(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok().map(str::trim)
}

/// MySQL's `0000-00-00` has no calendar equivalent; it is read as NULL.
fn zero_date(column: &str) -> UniversalValue {
    tracing::debug!("Column '{column}' holds a zero date, reading it as NULL");
    UniversalValue::Null
}
