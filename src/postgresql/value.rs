//! Typed PostgreSQL parameters and result values.
//!
//! Parameters are bound with the Rust type matching the destination column,
//! so NULLs and widened integers reach the server with the right OID.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tokio_postgres::types::ToSql;

use sync_core::{SyncError, UniversalType, UniversalValue};

pub type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Bind `value` for a column of type `ty`.
pub fn to_param(
    value: &UniversalValue,
    ty: &UniversalType,
    column: &str,
) -> Result<BoxedParam, SyncError> {
    let mismatch = || {
        SyncError::Data(format!(
            "column '{column}': cannot write {} value {value} as {ty}",
            value.kind()
        ))
    };

    let param: BoxedParam = match ty {
        UniversalType::Bool => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Bool(b) => Some(*b),
            UniversalValue::Int64(i) => Some(*i != 0),
            _ => return Err(mismatch()),
        }),
        UniversalType::Int16 => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Int64(i) => Some(i16::try_from(*i).map_err(|_| mismatch())?),
            UniversalValue::Bool(b) => Some(i16::from(*b)),
            _ => return Err(mismatch()),
        }),
        UniversalType::Int32 => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Int64(i) => Some(i32::try_from(*i).map_err(|_| mismatch())?),
            UniversalValue::Bool(b) => Some(i32::from(*b)),
            _ => return Err(mismatch()),
        }),
        UniversalType::Int64 => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Int64(i) => Some(*i),
            UniversalValue::Bool(b) => Some(i64::from(*b)),
            _ => return Err(mismatch()),
        }),
        UniversalType::Float32 => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Float64(f) => Some(*f as f32),
            UniversalValue::Int64(i) => Some(*i as f32),
            _ => return Err(mismatch()),
        }),
        UniversalType::Float64 => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Float64(f) => Some(*f),
            UniversalValue::Int64(i) => Some(*i as f64),
            _ => return Err(mismatch()),
        }),
        UniversalType::Decimal { .. } => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Decimal(d) => Some(*d),
            UniversalValue::Int64(i) => Some(Decimal::from(*i)),
            UniversalValue::Float64(f) => Some(Decimal::try_from(*f).map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        UniversalType::Char { .. } | UniversalType::VarChar { .. } | UniversalType::Text => {
            Box::new(match value {
                UniversalValue::Null => None,
                UniversalValue::Text(s) => Some(s.clone()),
                UniversalValue::Int64(i) => Some(i.to_string()),
                UniversalValue::Decimal(d) => Some(d.to_string()),
                _ => return Err(mismatch()),
            })
        }
        UniversalType::Bytes => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Bytes(b) => Some(b.clone()),
            UniversalValue::Text(s) => Some(s.clone().into_bytes()),
            _ => return Err(mismatch()),
        }),
        UniversalType::Date => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Date(d) => Some(*d),
            UniversalValue::Timestamp(ts) => Some(ts.date()),
            _ => return Err(mismatch()),
        }),
        UniversalType::Time => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Time(t) => Some(*t),
            _ => return Err(mismatch()),
        }),
        UniversalType::Timestamp => Box::new(match value {
            UniversalValue::Null => None,
            UniversalValue::Timestamp(ts) => Some(*ts),
            UniversalValue::Date(d) => Some(d.and_time(NaiveTime::MIN)),
            _ => return Err(mismatch()),
        }),
    };
    Ok(param)
}

/// Read column `index` of `row` as a value of type `ty`.
pub fn from_row(
    row: &tokio_postgres::Row,
    index: usize,
    ty: &UniversalType,
) -> Result<UniversalValue, SyncError> {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        index: usize,
    ) -> Result<Option<T>, SyncError> {
        row.try_get::<_, Option<T>>(index)
            .map_err(|e| SyncError::data(format!("cannot read result column {index}: {e}")))
    }

    let value = match ty {
        UniversalType::Bool => get::<bool>(row, index)?.map(UniversalValue::Bool),
        UniversalType::Int16 => get::<i16>(row, index)?.map(|v| UniversalValue::Int64(v.into())),
        UniversalType::Int32 => get::<i32>(row, index)?.map(|v| UniversalValue::Int64(v.into())),
        UniversalType::Int64 => get::<i64>(row, index)?.map(UniversalValue::Int64),
        UniversalType::Float32 => {
            get::<f32>(row, index)?.map(|v| UniversalValue::Float64(v.into()))
        }
        UniversalType::Float64 => get::<f64>(row, index)?.map(UniversalValue::Float64),
        UniversalType::Decimal { .. } => get::<Decimal>(row, index)?.map(UniversalValue::Decimal),
        UniversalType::Char { .. } | UniversalType::VarChar { .. } | UniversalType::Text => {
            get::<String>(row, index)?.map(UniversalValue::Text)
        }
        UniversalType::Bytes => get::<Vec<u8>>(row, index)?.map(UniversalValue::Bytes),
        UniversalType::Date => get::<NaiveDate>(row, index)?.map(UniversalValue::Date),
        UniversalType::Time => get::<NaiveTime>(row, index)?.map(UniversalValue::Time),
        UniversalType::Timestamp => {
            get::<NaiveDateTime>(row, index)?.map(UniversalValue::Timestamp)
        }
    };
    Ok(value.unwrap_or(UniversalValue::Null))
}
