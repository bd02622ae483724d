//! Value representations for legacy-sync.
//!
//! [`UniversalValue`] is the typed cell value that flows between the source
//! reader, the row transforms and the destination writer; [`Row`] maps column
//! names to those values.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::UniversalType;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A typed value read from or written to a database.
///
/// Integer widths collapse into `Int64`; the column's [`UniversalType`]
/// decides the width used on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum UniversalValue {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// Any integer value
    Int64(i64),
    /// Any floating point value
    Float64(f64),
    /// Exact decimal
    Decimal(Decimal),
    /// Character data
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Timestamp without timezone
    Timestamp(NaiveDateTime),
}

impl UniversalValue {
    /// Whether this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the value's variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int64(_) => "int64",
            Self::Float64(_) => "float64",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Compare two values of compatible kinds.
    ///
    /// NULL sorts before every other value. Integers compare exactly against
    /// decimals. Returns `None` for incompatible kinds.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        use UniversalValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) => Some(Ordering::Less),
            (_, Null) => Some(Ordering::Greater),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int64(a), Int64(b)) => Some(a.cmp(b)),
            (Int64(a), Decimal(b)) => Some(rust_decimal::Decimal::from(*a).cmp(b)),
            (Decimal(a), Int64(b)) => Some(a.cmp(&rust_decimal::Decimal::from(*b))),
            (Decimal(a), Decimal(b)) => Some(a.cmp(b)),
            (Float64(a), Float64(b)) => a.partial_cmp(b),
            (Int64(a), Float64(b)) => (*a as f64).partial_cmp(b),
            (Float64(a), Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Date(a), Timestamp(b)) => Some(a.and_time(NaiveTime::MIN).cmp(b)),
            (Timestamp(a), Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::MIN))),
            _ => None,
        }
    }

    /// Encode as JSON the way PostgreSQL's `row_to_json` renders the same value.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int64(i) => Json::from(*i),
            Self::Float64(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::Decimal(d) => Json::String(d.to_string()),
            Self::Text(s) => Json::String(s.clone()),
            Self::Bytes(b) => Json::String(format!("\\x{}", hex::encode(b))),
            Self::Date(d) => Json::String(d.format(DATE_FORMAT).to_string()),
            Self::Time(t) => Json::String(t.format(TIME_FORMAT).to_string()),
            Self::Timestamp(ts) => Json::String(ts.format(TIMESTAMP_FORMAT).to_string()),
        }
    }

    /// Decode a JSON value produced by [`UniversalValue::to_json`] (or by
    /// `row_to_json`) back into a typed value for a column of type `ty`.
    pub fn from_json(value: &serde_json::Value, ty: &UniversalType) -> Result<Self, SyncError> {
        use serde_json::Value as Json;

        let mismatch = || {
            SyncError::Data(format!(
                "cannot decode JSON value {value} as {ty}"
            ))
        };

        if value.is_null() {
            return Ok(Self::Null);
        }

        match ty {
            UniversalType::Bool => value.as_bool().map(Self::Bool).ok_or_else(mismatch),
            UniversalType::Int16 | UniversalType::Int32 | UniversalType::Int64 => {
                value.as_i64().map(Self::Int64).ok_or_else(mismatch)
            }
            UniversalType::Float32 | UniversalType::Float64 => {
                value.as_f64().map(Self::Float64).ok_or_else(mismatch)
            }
            UniversalType::Decimal { .. } => match value {
                Json::String(s) => s.parse::<Decimal>().map(Self::Decimal).map_err(|_| mismatch()),
                Json::Number(n) => n
                    .to_string()
                    .parse::<Decimal>()
                    .map(Self::Decimal)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            UniversalType::Char { .. } | UniversalType::VarChar { .. } | UniversalType::Text => {
                value.as_str().map(|s| Self::Text(s.to_string())).ok_or_else(mismatch)
            }
            UniversalType::Bytes => {
                let s = value.as_str().ok_or_else(mismatch)?;
                let digits = s.strip_prefix("\\x").unwrap_or(s);
                hex::decode(digits).map(Self::Bytes).map_err(|_| mismatch())
            }
            UniversalType::Date => {
                let s = value.as_str().ok_or_else(mismatch)?;
                NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .map(Self::Date)
                    .map_err(|_| mismatch())
            }
            UniversalType::Time => {
                let s = value.as_str().ok_or_else(mismatch)?;
                NaiveTime::parse_from_str(s, TIME_FORMAT)
                    .map(Self::Time)
                    .map_err(|_| mismatch())
            }
            UniversalType::Timestamp => {
                let s = value.as_str().ok_or_else(mismatch)?;
                NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                    .map(Self::Timestamp)
                    .map_err(|_| mismatch())
            }
        }
    }
}

impl fmt::Display for UniversalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Float64(x) => write!(f, "{x}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "\\x{}", hex::encode(b)),
            Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Self::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            Self::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

/// Compare two composite keys column by column.
///
/// Incomparable column pairs are treated as equal so the comparison stays
/// total; keys of one table always share column types.
pub fn compare_keys(a: &[UniversalValue], b: &[UniversalValue]) -> Ordering {
    for (left, right) in a.iter().zip(b.iter()) {
        match left.compare(right) {
            Some(Ordering::Equal) | None => continue,
            Some(ordering) => return ordering,
        }
    }
    a.len().cmp(&b.len())
}

/// A single row: column name to typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: BTreeMap<String, UniversalValue>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: UniversalValue) -> Self {
        self.values.insert(column.into(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&UniversalValue> {
        self.values.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: UniversalValue) -> Option<UniversalValue> {
        self.values.insert(column.into(), value)
    }

    pub fn remove(&mut self, column: &str) -> Option<UniversalValue> {
        self.values.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniversalValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Values of `columns` in order, `Null` for absent columns.
    pub fn project(&self, columns: &[&str]) -> Vec<UniversalValue> {
        columns
            .iter()
            .map(|c| self.values.get(*c).cloned().unwrap_or(UniversalValue::Null))
            .collect()
    }
}

impl FromIterator<(String, UniversalValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, UniversalValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Row {
    type Item = (String, UniversalValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, UniversalValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn ts(s: &str) -> UniversalValue {
        UniversalValue::Timestamp(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap())
    }

    #[test]
    fn test_compare_mixed_numeric() {
        let int = UniversalValue::Int64(10);
        let dec = UniversalValue::Decimal(Decimal::from_str("10.5").unwrap());
        assert_eq!(int.compare(&dec), Some(Ordering::Less));
        assert_eq!(dec.compare(&int), Some(Ordering::Greater));
        assert_eq!(int.compare(&UniversalValue::Text("10".into())), None);
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(
            UniversalValue::Null.compare(&UniversalValue::Int64(i64::MIN)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_compare_keys_lexicographic() {
        let a = vec![UniversalValue::Int64(1), UniversalValue::Text("b".into())];
        let b = vec![UniversalValue::Int64(1), UniversalValue::Text("c".into())];
        let c = vec![UniversalValue::Int64(2), UniversalValue::Text("a".into())];
        assert_eq!(compare_keys(&a, &b), Ordering::Less);
        assert_eq!(compare_keys(&c, &b), Ordering::Greater);
        assert_eq!(compare_keys(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_json_matches_row_to_json_rendering() {
        let value = ts("2024-03-01 12:30:00");
        assert_eq!(value.to_json(), serde_json::json!("2024-03-01T12:30:00"));

        let bytes = UniversalValue::Bytes(vec![0xde, 0xad]);
        assert_eq!(bytes.to_json(), serde_json::json!("\\xdead"));

        let amount = UniversalValue::Decimal(Decimal::from_str("19.9900").unwrap());
        assert_eq!(amount.to_json(), serde_json::json!("19.9900"));
    }

    #[test]
    fn test_from_json_uses_column_type() {
        let decoded = UniversalValue::from_json(
            &serde_json::json!("2024-03-01T12:30:00.250"),
            &UniversalType::Timestamp,
        )
        .unwrap();
        assert!(matches!(decoded, UniversalValue::Timestamp(_)));

        let numeric =
            UniversalValue::from_json(&serde_json::json!(12.5), &UniversalType::decimal(10, 2))
                .unwrap();
        assert_eq!(
            numeric,
            UniversalValue::Decimal(Decimal::from_str("12.5").unwrap())
        );

        let err = UniversalValue::from_json(&serde_json::json!("x"), &UniversalType::Int32)
            .unwrap_err();
        assert!(matches!(err, SyncError::Data(_)));
    }

    #[test]
    fn test_row_project_fills_missing_with_null() {
        let row = Row::new()
            .with("id", UniversalValue::Int64(7))
            .with("name", UniversalValue::Text("x".into()));
        assert_eq!(
            row.project(&["id", "missing"]),
            vec![UniversalValue::Int64(7), UniversalValue::Null]
        );
    }
}
