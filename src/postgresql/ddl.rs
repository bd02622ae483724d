//! PostgreSQL DDL and DML generation from `UniversalType`.
//!
//! This module renders translated table mappings as PostgreSQL statements:
//! column types, `CREATE TABLE`, `CREATE INDEX` and the multi-row upsert the
//! migrator writes batches with.

use sync_core::{ColumnDefault, MappedColumn, TableMapping, ToDdl, UniversalType};

/// PostgreSQL identifiers are truncated beyond this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// PostgreSQL DDL generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgreSQLDdl;

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, escaping embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl ToDdl for PostgreSQLDdl {
    fn to_ddl(&self, sync_type: &UniversalType) -> String {
        match sync_type {
            // Boolean
            UniversalType::Bool => "BOOLEAN".to_string(),

            // Integer types
            UniversalType::Int16 => "SMALLINT".to_string(),
            UniversalType::Int32 => "INTEGER".to_string(),
            UniversalType::Int64 => "BIGINT".to_string(),

            // Floating point
            UniversalType::Float32 => "REAL".to_string(),
            UniversalType::Float64 => "DOUBLE PRECISION".to_string(),

            // Exact numeric
            UniversalType::Decimal { precision, scale } => {
                format!("NUMERIC({precision},{scale})")
            }

            // String types
            UniversalType::Char { length } => format!("CHAR({length})"),
            UniversalType::VarChar { length } => format!("VARCHAR({length})"),
            UniversalType::Text => "TEXT".to_string(),

            // Binary types
            UniversalType::Bytes => "BYTEA".to_string(),

            // Date/time types
            UniversalType::Date => "DATE".to_string(),
            UniversalType::Time => "TIME".to_string(),
            UniversalType::Timestamp => "TIMESTAMP".to_string(),
        }
    }
}

impl PostgreSQLDdl {
    fn column_def(&self, column: &MappedColumn) -> String {
        let mut def = format!(
            "  {} {}",
            quote_ident(&column.name),
            self.to_ddl(&column.target_type)
        );
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        match &column.default {
            Some(ColumnDefault::CurrentTimestamp) => def.push_str(" DEFAULT CURRENT_TIMESTAMP"),
            Some(ColumnDefault::Literal(literal)) => {
                def.push_str(" DEFAULT ");
                def.push_str(literal);
            }
            None => {}
        }
        def
    }

    /// Generate a CREATE TABLE statement with the mapping's primary key.
    pub fn to_create_table(&self, mapping: &TableMapping) -> String {
        let mut lines: Vec<String> = mapping.columns.iter().map(|c| self.column_def(c)).collect();
        let key: Vec<String> = mapping.primary_key.iter().map(|k| quote_ident(k)).collect();
        lines.push(format!("  PRIMARY KEY ({})", key.join(", ")));

        format!(
            "CREATE TABLE {} (\n{}\n)",
            quote_ident(&mapping.table),
            lines.join(",\n")
        )
    }

    /// Generate a CREATE INDEX statement.
    pub fn to_create_index(&self, name: &str, table: &str, columns: &[String]) -> String {
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "CREATE INDEX {} ON {} ({})",
            quote_ident(name),
            quote_ident(table),
            cols.join(", ")
        )
    }

    /// Conventional index name `idx_{table}_{columns}`, cut to the identifier
    /// limit on a character boundary.
    pub fn index_name(&self, table: &str, columns: &[String]) -> String {
        let mut name = format!("idx_{}_{}", table, columns.join("_"));
        if name.len() > MAX_IDENTIFIER_LEN {
            let mut cut = MAX_IDENTIFIER_LEN;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        name
    }

    /// Generate a multi-row upsert for `rows` rows.
    ///
    /// Conflicting keys overwrite every non-key column. A table with only key
    /// columns has nothing to overwrite and uses `DO NOTHING`.
    pub fn to_upsert(&self, mapping: &TableMapping, rows: usize) -> String {
        let columns = mapping.column_names();
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let width = columns.len();

        let values: Vec<String> = (0..rows)
            .map(|r| {
                let placeholders: Vec<String> =
                    (1..=width).map(|c| format!("${}", r * width + c)).collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();

        let key: Vec<String> = mapping.primary_key.iter().map(|k| quote_ident(k)).collect();
        let updates: Vec<String> = mapping
            .value_columns()
            .iter()
            .map(|c| format!("{q} = EXCLUDED.{q}", q = quote_ident(c)))
            .collect();

        let conflict = if updates.is_empty() {
            format!("ON CONFLICT ({}) DO NOTHING", key.join(", "))
        } else {
            format!(
                "ON CONFLICT ({}) DO UPDATE SET {}",
                key.join(", "),
                updates.join(", ")
            )
        };

        format!(
            "INSERT INTO {} ({}) VALUES {} {}",
            quote_ident(&mapping.table),
            quoted.join(", "),
            values.join(", "),
            conflict
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> TableMapping {
        TableMapping {
            table: "orders".into(),
            columns: vec![
                MappedColumn::new("id", UniversalType::Int32).primary_key(),
                MappedColumn::new("total", UniversalType::decimal(10, 2)).not_null(),
                MappedColumn::new("updated_at", UniversalType::Timestamp)
                    .with_default(ColumnDefault::CurrentTimestamp),
            ],
            primary_key: vec!["id".into()],
            change_tracking_column: Some("updated_at".into()),
        }
    }

    #[test]
    fn test_type_ddl() {
        let ddl = PostgreSQLDdl;
        assert_eq!(ddl.to_ddl(&UniversalType::Bool), "BOOLEAN");
        assert_eq!(ddl.to_ddl(&UniversalType::Int16), "SMALLINT");
        assert_eq!(ddl.to_ddl(&UniversalType::decimal(19, 4)), "NUMERIC(19,4)");
        assert_eq!(ddl.to_ddl(&UniversalType::varchar(80)), "VARCHAR(80)");
        assert_eq!(ddl.to_ddl(&UniversalType::Bytes), "BYTEA");
        assert_eq!(ddl.to_ddl(&UniversalType::Timestamp), "TIMESTAMP");
    }

    #[test]
    fn test_create_table() {
        let sql = PostgreSQLDdl.to_create_table(&mapping());
        assert!(sql.starts_with("CREATE TABLE \"orders\" ("));
        assert!(sql.contains("\"id\" INTEGER NOT NULL"));
        assert!(sql.contains("\"total\" NUMERIC(10,2) NOT NULL"));
        assert!(sql.contains("\"updated_at\" TIMESTAMP DEFAULT CURRENT_TIMESTAMP"));
        assert!(sql.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn test_upsert_overwrites_value_columns() {
        let sql = PostgreSQLDdl.to_upsert(&mapping(), 2);
        assert_eq!(
            sql,
            "INSERT INTO \"orders\" (\"id\", \"total\", \"updated_at\") \
             VALUES ($1, $2, $3), ($4, $5, $6) \
             ON CONFLICT (\"id\") DO UPDATE SET \"total\" = EXCLUDED.\"total\", \
             \"updated_at\" = EXCLUDED.\"updated_at\""
        );
    }

    #[test]
    fn test_upsert_key_only_table() {
        let mapping = TableMapping {
            table: "tags".into(),
            columns: vec![
                MappedColumn::new("post_id", UniversalType::Int64).primary_key(),
                MappedColumn::new("tag", UniversalType::varchar(20)).primary_key(),
            ],
            primary_key: vec!["post_id".into(), "tag".into()],
            change_tracking_column: None,
        };
        let sql = PostgreSQLDdl.to_upsert(&mapping, 1);
        assert!(sql.ends_with("ON CONFLICT (\"post_id\", \"tag\") DO NOTHING"));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_index_name_truncated() {
        let ddl = PostgreSQLDdl;
        assert_eq!(
            ddl.index_name("orders", &["updated_at".to_string()]),
            "idx_orders_updated_at"
        );
        let long = "x".repeat(80);
        assert_eq!(ddl.index_name(&long, &["c".to_string()]).len(), MAX_IDENTIFIER_LEN);
    }
}
