//! Per-table row transformations applied between extraction and write.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use sync_core::{Row, SyncError, TableMapping};

/// A pure row-to-row function. It must not perform I/O.
pub type RowTransform = Arc<dyn Fn(Row) -> Row + Send + Sync>;

/// Transformations registered by table name.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, RowTransform>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tables: Vec<&String> = self.transforms.keys().collect();
        tables.sort();
        f.debug_struct("TransformRegistry")
            .field("tables", &tables)
            .finish()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transform` for `table`, replacing any earlier one.
    pub fn register<F>(&mut self, table: impl Into<String>, transform: F)
    where
        F: Fn(Row) -> Row + Send + Sync + 'static,
    {
        self.transforms.insert(table.into(), Arc::new(transform));
    }

    pub fn get(&self, table: &str) -> Option<RowTransform> {
        self.transforms.get(table).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

/// Check that a transformed row has exactly the mapping's columns.
pub fn validate_shape(mapping: &TableMapping, row: &Row) -> Result<(), SyncError> {
    let expected: BTreeSet<&str> = mapping.columns.iter().map(|c| c.name.as_str()).collect();
    let actual: BTreeSet<&str> = row.columns().collect();
    if expected == actual {
        return Ok(());
    }

    let missing: Vec<&str> = expected.difference(&actual).copied().collect();
    let unexpected: Vec<&str> = actual.difference(&expected).copied().collect();
    Err(SyncError::data(format!(
        "transform for table '{}' produced a row that does not match the destination \
         columns (missing: [{}], unexpected: [{}])",
        mapping.table,
        missing.join(", "),
        unexpected.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{MappedColumn, UniversalType, UniversalValue};

    fn mapping() -> TableMapping {
        TableMapping {
            table: "users".into(),
            columns: vec![
                MappedColumn::new("id", UniversalType::Int64).primary_key(),
                MappedColumn::new("email", UniversalType::Text),
            ],
            primary_key: vec!["id".into()],
            change_tracking_column: None,
        }
    }

    #[test]
    fn test_registered_transform_is_applied() {
        let mut registry = TransformRegistry::new();
        registry.register("users", |row: Row| {
            let email = match row.get("email") {
                Some(UniversalValue::Text(s)) => UniversalValue::Text(s.to_lowercase()),
                other => other.cloned().unwrap_or(UniversalValue::Null),
            };
            row.with("email", email)
        });

        let transform = registry.get("users").unwrap();
        let row = Row::new()
            .with("id", UniversalValue::Int64(1))
            .with("email", UniversalValue::Text("A@B.COM".into()));
        let out = transform(row);
        assert_eq!(out.get("email"), Some(&UniversalValue::Text("a@b.com".into())));
        assert!(registry.get("orders").is_none());
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let row = Row::new()
            .with("id", UniversalValue::Int64(1))
            .with("mail", UniversalValue::Null);
        let err = validate_shape(&mapping(), &row).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("missing: [email]"));
        assert!(message.contains("unexpected: [mail]"));
    }

    #[test]
    fn test_matching_shape_passes() {
        let row = Row::new()
            .with("id", UniversalValue::Int64(1))
            .with("email", UniversalValue::Null);
        assert!(validate_shape(&mapping(), &row).is_ok());
    }
}
