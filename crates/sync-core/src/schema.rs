//! Schema definitions for legacy-sync.
//!
//! ## Type Hierarchy
//!
//! **Source side** (as introspected, never modified during a run):
//! - `SourceType` - The legacy database's own spelling of a column type
//! - `ColumnDefinition` - Single column metadata
//! - `TableSchema` - Table with ordered columns and a non-empty primary key
//!
//! **Destination side** (produced by the schema translator):
//! - `MappedColumn` - Column with its translated `UniversalType`
//! - `TableMapping` - What the migrator and sync engine read and write
//! - `IndexDefinition` - A secondary index to create on the destination

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::SyncError;
use crate::types::UniversalType;
use crate::values::{Row, UniversalValue};

// ============================================================================
// Source Types
// ============================================================================

/// A column type as reported by the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceType {
    /// Base type name, lowercase (e.g. `varchar`, `decimal`, `datetime`)
    pub name: String,
    /// Character or binary length, if any
    pub length: Option<u32>,
    /// Numeric precision, if any
    pub precision: Option<u8>,
    /// Numeric scale, if any
    pub scale: Option<u8>,
    /// MySQL `UNSIGNED` modifier
    pub unsigned: bool,
}

impl SourceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            length: None,
            precision: None,
            scale: None,
            unsigned: false,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match (self.length, self.precision, self.scale) {
            (Some(length), _, _) => write!(f, "({length})")?,
            (None, Some(p), Some(s)) => write!(f, "({p},{s})")?,
            _ => {}
        }
        if self.unsigned {
            write!(f, " unsigned")?;
        }
        Ok(())
    }
}

/// Column definition as read from the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// Source type
    pub source_type: SourceType,
    /// Whether the column accepts NULL
    pub nullable: bool,
    /// Default expression as the source reports it
    pub default: Option<String>,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            name: name.into(),
            source_type,
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    /// Mark as (part of) the primary key; key columns are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Introspected source table.
///
/// Construct through [`TableSchema::new`], which enforces a non-empty primary
/// key and unique column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnDefinition>,
    /// Primary key column names in key order.
    primary_key: Vec<String>,
}

impl TableSchema {
    /// Build a schema whose primary key is the flagged columns in column order.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Result<Self, SyncError> {
        let primary_key = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        Self::with_key_order(name, columns, primary_key)
    }

    /// Build a schema with an explicit primary key order (composite keys
    /// whose catalog order differs from column order).
    pub fn with_key_order(
        name: impl Into<String>,
        mut columns: Vec<ColumnDefinition>,
        primary_key: Vec<String>,
    ) -> Result<Self, SyncError> {
        let name = name.into();
        if columns.is_empty() {
            return Err(SyncError::schema(format!("table '{name}' has no columns")));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SyncError::schema(format!(
                    "table '{name}' declares column '{}' twice",
                    column.name
                )));
            }
        }

        if primary_key.is_empty() {
            return Err(SyncError::schema(format!(
                "table '{name}' has no primary key; keyed upserts require one"
            )));
        }
        for key in &primary_key {
            let column = columns.iter_mut().find(|c| &c.name == key).ok_or_else(|| {
                SyncError::schema(format!(
                    "primary key column '{key}' is not a column of table '{name}'"
                ))
            })?;
            column.primary_key = true;
            column.nullable = false;
        }

        Ok(Self {
            name,
            columns,
            primary_key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }
}

// ============================================================================
// Destination Types
// ============================================================================

/// Default value of a destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    /// `DEFAULT CURRENT_TIMESTAMP`
    CurrentTimestamp,
    /// A literal, already rendered as destination SQL
    Literal(String),
}

/// Translated destination column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedColumn {
    pub name: String,
    pub target_type: UniversalType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    pub primary_key: bool,
}

impl MappedColumn {
    pub fn new(name: impl Into<String>, target_type: UniversalType) -> Self {
        Self {
            name: name.into(),
            target_type,
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }
}

/// A translated table: what the migrator reads from the source and writes to
/// the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub table: String,
    pub columns: Vec<MappedColumn>,
    /// Primary key column names in key order
    pub primary_key: Vec<String>,
    /// Column whose value advances whenever a row changes
    pub change_tracking_column: Option<String>,
}

impl TableMapping {
    pub fn column(&self, name: &str) -> Option<&MappedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn key_columns(&self) -> Vec<&str> {
        self.primary_key.iter().map(String::as_str).collect()
    }

    /// Non-key columns, the ones an upsert overwrites on conflict.
    pub fn value_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !self.primary_key.contains(&c.name))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Primary key values of `row`, in key order.
    pub fn key_of(&self, row: &Row) -> Result<Vec<UniversalValue>, SyncError> {
        self.primary_key
            .iter()
            .map(|k| match row.get(k) {
                Some(v) if !v.is_null() => Ok(v.clone()),
                _ => Err(SyncError::data(format!(
                    "row of table '{}' has no value for key column '{k}'",
                    self.table
                ))),
            })
            .collect()
    }
}

/// A secondary index on the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    /// Full `CREATE INDEX` statement
    pub sql: String,
}
