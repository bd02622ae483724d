//! Building blocks of a sectioned backup archive.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// One of the three ordered, independently restorable parts of an archive.
///
/// The derived ordering is the restore order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    /// Type, function, sequence and table definitions
    PreData,
    /// Row content and sequence positions
    Data,
    /// Constraints, indexes and triggers
    PostData,
}

impl Section {
    /// All sections in restore order.
    pub const ALL: [Section; 3] = [Section::PreData, Section::Data, Section::PostData];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::PreData => "pre-data",
            Section::Data => "data",
            Section::PostData => "post-data",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre-data" => Ok(Section::PreData),
            "data" => Ok(Section::Data),
            "post-data" => Ok(Section::PostData),
            other => Err(SyncError::Archive(format!(
                "unknown section '{other}', expected pre-data, data or post-data"
            ))),
        }
    }
}

/// Kind of schema object a definition entry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Type,
    Function,
    Sequence,
    Table,
    SequenceValue,
    Constraint,
    Index,
    Trigger,
}

impl ObjectKind {
    /// The section an object of this kind belongs to.
    pub fn section(&self) -> Section {
        match self {
            ObjectKind::Type | ObjectKind::Function | ObjectKind::Sequence | ObjectKind::Table => {
                Section::PreData
            }
            ObjectKind::SequenceValue => Section::Data,
            ObjectKind::Constraint | ObjectKind::Index | ObjectKind::Trigger => Section::PostData,
        }
    }
}

/// One entry of an archive section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchiveEntry {
    /// A statement that creates or positions a schema object.
    Definition {
        object: ObjectKind,
        name: String,
        sql: String,
    },
    /// The rows of one table, each a JSON object keyed by column name.
    TableData {
        table: String,
        columns: Vec<String>,
        rows: Vec<serde_json::Value>,
    },
}

impl ArchiveEntry {
    /// Label used by archive listings, e.g. `TABLE customers`.
    pub fn describe(&self) -> String {
        match self {
            ArchiveEntry::Definition { object, name, .. } => {
                let kind = match object {
                    ObjectKind::Type => "TYPE",
                    ObjectKind::Function => "FUNCTION",
                    ObjectKind::Sequence => "SEQUENCE",
                    ObjectKind::Table => "TABLE",
                    ObjectKind::SequenceValue => "SEQUENCE SET",
                    ObjectKind::Constraint => "CONSTRAINT",
                    ObjectKind::Index => "INDEX",
                    ObjectKind::Trigger => "TRIGGER",
                };
                format!("{kind} {name}")
            }
            ArchiveEntry::TableData { table, rows, .. } => {
                format!("TABLE DATA {table} ({} rows)", rows.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_order_is_restore_order() {
        let mut sections = vec![Section::PostData, Section::PreData, Section::Data];
        sections.sort();
        assert_eq!(sections, Section::ALL.to_vec());
    }

    #[test]
    fn test_section_tags() {
        for section in Section::ALL {
            assert_eq!(section.as_str().parse::<Section>().unwrap(), section);
        }
        assert_eq!(
            serde_json::to_string(&Section::PostData).unwrap(),
            "\"post-data\""
        );
        assert!("schema".parse::<Section>().is_err());
    }

    #[test]
    fn test_entry_tagging() {
        let entry = ArchiveEntry::Definition {
            object: ObjectKind::Index,
            name: "idx_orders_updated_at".into(),
            sql: "CREATE INDEX ...".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "definition");
        assert_eq!(json["object"], "index");
        assert_eq!(entry.describe(), "INDEX idx_orders_updated_at");
        assert_eq!(ObjectKind::Index.section(), Section::PostData);
    }
}
