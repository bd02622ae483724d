//! MySQL schema introspection
//!
//! Reads `information_schema` for the connection's current database and
//! builds the `TableSchema` the translator consumes.

use mysql_async::prelude::*;
use mysql_async::Conn;

use sync_core::{ColumnDefinition, SourceType, SyncError, TableSchema};

use super::map_error;

/// Base tables of the current database, sorted by name.
pub async fn get_user_tables(conn: &mut Conn) -> Result<Vec<String>, SyncError> {
    let query = "
        SELECT TABLE_NAME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = DATABASE()
        AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
    ";

    conn.query(query).await.map_err(map_error)
}

type ColumnRow = (
    String,
    String,
    String,
    Option<u64>,
    Option<u64>,
    Option<u64>,
    String,
    Option<String>,
);

/// Introspect `table`: columns in ordinal order and the primary key in key
/// order.
pub async fn describe_table(conn: &mut Conn, table: &str) -> Result<TableSchema, SyncError> {
    let query = "
        SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, CHARACTER_MAXIMUM_LENGTH,
               NUMERIC_PRECISION, NUMERIC_SCALE, IS_NULLABLE, COLUMN_DEFAULT
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE()
        AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    ";
    let rows: Vec<ColumnRow> = conn.exec(query, (table,)).await.map_err(map_error)?;
    if rows.is_empty() {
        return Err(SyncError::schema(format!(
            "table '{table}' does not exist in the source database"
        )));
    }

    let columns = rows
        .into_iter()
        .map(
            |(name, data_type, column_type, char_length, precision, scale, nullable, default)| {
                let source_type = source_type(&data_type, &column_type, char_length, precision, scale);
                let mut column = ColumnDefinition::new(name, source_type);
                column.nullable = nullable.eq_ignore_ascii_case("YES");
                column.default = default;
                column
            },
        )
        .collect();

    let primary_key = get_primary_key_columns(conn, table).await?;
    TableSchema::with_key_order(table, columns, primary_key)
}

/// Primary key columns of `table` in key order; empty when it has none.
pub async fn get_primary_key_columns(conn: &mut Conn, table: &str) -> Result<Vec<String>, SyncError> {
    let query = "
        SELECT COLUMN_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = DATABASE()
        AND TABLE_NAME = ?
        AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
    ";

    conn.exec(query, (table,)).await.map_err(map_error)
}

/// Build a `SourceType` from catalog columns. `column_type` carries the
/// `unsigned` attribute, which `DATA_TYPE` drops.
fn source_type(
    data_type: &str,
    column_type: &str,
    char_length: Option<u64>,
    precision: Option<u64>,
    scale: Option<u64>,
) -> SourceType {
    let mut ty = SourceType::new(data_type);
    match ty.name.as_str() {
        "decimal" | "numeric" => {
            if let (Some(p), Some(s)) = (precision, scale) {
                ty = ty.with_precision(saturate_u8(p), saturate_u8(s));
            }
        }
        // BIT reports its width as numeric precision.
        "bit" => {
            if let Some(width) = precision {
                ty = ty.with_length(saturate_u32(width));
            }
        }
        _ => {
            if let Some(length) = char_length {
                ty = ty.with_length(saturate_u32(length));
            }
        }
    }
    if column_type.to_ascii_lowercase().contains("unsigned") {
        ty = ty.unsigned();
    }
    ty
}

fn saturate_u8(n: u64) -> u8 {
    u8::try_from(n).unwrap_or(u8::MAX)
}

fn saturate_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
