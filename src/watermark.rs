//! Per-table high-water mark for incremental sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use checkpoint::Checkpoint;
use sync_core::{compare_keys, ChangeFilter, LatestChange, UniversalValue};

/// The highest change-tracking value already synchronized for a table,
/// with the tie-break state for rows sharing that value.
///
/// Rows at the mark are ordered by primary key ascending; `last_key_at_mark`
/// is the greatest key synchronized at the mark, so the next cycle resumes
/// strictly after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkCursor {
    pub table: String,
    pub column: String,
    pub mark: Option<UniversalValue>,
    pub rows_at_mark: u64,
    pub last_key_at_mark: Option<Vec<UniversalValue>>,
    pub updated_at: DateTime<Utc>,
}

impl WatermarkCursor {
    /// A cursor that has seen nothing; the first cycle reads every row.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            mark: None,
            rows_at_mark: 0,
            last_key_at_mark: None,
            updated_at: Utc::now(),
        }
    }

    /// A cursor positioned at the newest change already in the destination.
    /// Rows at that value with a greater key are still read; the rest are
    /// treated as synchronized.
    pub fn seeded(
        table: impl Into<String>,
        column: impl Into<String>,
        latest: Option<LatestChange>,
    ) -> Self {
        let mut cursor = Self::new(table, column);
        if let Some(latest) = latest.filter(|l| !l.value.is_null()) {
            cursor.mark = Some(latest.value);
            cursor.rows_at_mark = latest.rows;
            cursor.last_key_at_mark = Some(latest.key);
        }
        cursor
    }

    pub fn filter(&self) -> ChangeFilter {
        ChangeFilter {
            column: self.column.clone(),
            mark: self.mark.clone(),
            after_key: self.last_key_at_mark.clone(),
        }
    }

    /// Record a synchronized row. Values below the mark are ignored so the
    /// cursor never moves backward.
    pub fn observe(&mut self, value: &UniversalValue, key: &[UniversalValue]) {
        if value.is_null() {
            return;
        }
        let ordering = match &self.mark {
            None => Ordering::Greater,
            Some(mark) => match value.compare(mark) {
                Some(ordering) => ordering,
                None => {
                    tracing::warn!(
                        "Ignoring {} value {value} of {}: not comparable with watermark {mark}",
                        self.column,
                        self.table
                    );
                    return;
                }
            },
        };

        match ordering {
            Ordering::Greater => {
                self.mark = Some(value.clone());
                self.rows_at_mark = 1;
                self.last_key_at_mark = Some(key.to_vec());
            }
            Ordering::Equal => {
                self.rows_at_mark += 1;
                let advance = self
                    .last_key_at_mark
                    .as_deref()
                    .map_or(true, |last| compare_keys(key, last) == Ordering::Greater);
                if advance {
                    self.last_key_at_mark = Some(key.to_vec());
                }
            }
            Ordering::Less => {}
        }
        self.updated_at = Utc::now();
    }

    /// Whether `other` is at or beyond this cursor.
    pub fn is_at_or_beyond(&self, other: &WatermarkCursor) -> bool {
        match (&self.mark, &other.mark) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(b)) => match a.compare(b) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => match (&self.last_key_at_mark, &other.last_key_at_mark) {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(a), Some(b)) => compare_keys(a, b) != Ordering::Less,
                },
                _ => false,
            },
        }
    }

    /// Mark rendered for logs.
    pub fn describe_mark(&self) -> Option<String> {
        self.mark.as_ref().map(ToString::to_string)
    }
}

impl Checkpoint for WatermarkCursor {
    const KIND: &'static str = "watermark";

    fn to_cli_string(&self) -> String {
        match &self.mark {
            Some(mark) => format!(
                "{}.{} at {mark} ({} row(s) at mark)",
                self.table, self.column, self.rows_at_mark
            ),
            None => format!("{}.{} not started", self.table, self.column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: i64) -> Vec<UniversalValue> {
        vec![UniversalValue::Int64(id)]
    }

    fn v(n: i64) -> UniversalValue {
        UniversalValue::Int64(n)
    }

    #[test]
    fn test_observe_advances_and_counts_ties() {
        let mut cursor = WatermarkCursor::new("orders", "version");
        cursor.observe(&v(5), &key(1));
        cursor.observe(&v(7), &key(3));
        cursor.observe(&v(7), &key(4));
        assert_eq!(cursor.mark, Some(v(7)));
        assert_eq!(cursor.rows_at_mark, 2);
        assert_eq!(cursor.last_key_at_mark, Some(key(4)));
    }

    #[test]
    fn test_never_moves_backward() {
        let mut cursor = WatermarkCursor::new("orders", "version");
        cursor.observe(&v(10), &key(2));
        let before = cursor.clone();
        cursor.observe(&v(3), &key(9));
        cursor.observe(&UniversalValue::Null, &key(10));
        assert_eq!(cursor.mark, before.mark);
        assert_eq!(cursor.last_key_at_mark, before.last_key_at_mark);
        assert!(cursor.is_at_or_beyond(&before));
    }

    #[test]
    fn test_filter_carries_tie_break() {
        let mut cursor = WatermarkCursor::new("orders", "version");
        cursor.observe(&v(10), &key(2));
        let filter = cursor.filter();
        assert_eq!(filter.column, "version");
        assert!(!filter.admits(&v(10), &key(2)));
        assert!(filter.admits(&v(10), &key(3)));
        assert!(filter.admits(&v(11), &key(1)));
    }

    #[test]
    fn test_seeded_cursor_resumes_after_latest_key() {
        let latest = LatestChange {
            value: v(10),
            key: key(4),
            rows: 2,
        };
        let cursor = WatermarkCursor::seeded("orders", "version", Some(latest));
        assert_eq!(cursor.rows_at_mark, 2);
        assert!(!cursor.filter().admits(&v(10), &key(4)));
        assert!(cursor.filter().admits(&v(10), &key(5)));
        assert!(cursor.filter().admits(&v(11), &key(1)));
        assert!(!cursor.filter().admits(&v(9), &key(9)));

        let empty = WatermarkCursor::seeded("orders", "version", None);
        assert!(empty.filter().admits(&v(0), &key(1)));
    }

    #[test]
    fn test_checkpoint_form() {
        let mut cursor = WatermarkCursor::new("orders", "version");
        assert_eq!(cursor.to_cli_string(), "orders.version not started");
        cursor.observe(&v(3), &key(1));
        assert_eq!(cursor.to_cli_string(), "orders.version at 3 (1 row(s) at mark)");
        assert!(WatermarkCursor::from_cli_string("3").is_err());
    }
}
