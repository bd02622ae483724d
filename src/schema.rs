//! Schema translation: source table metadata to destination DDL.
//!
//! Translation is pure and per table. An unmapped column type fails only
//! that table. Applying the result checks the destination catalog first, so
//! re-running against an already prepared destination creates nothing.

use sync_core::{
    ColumnDefault, DestinationSession, IndexDefinition, MappedColumn, SyncError, TableMapping,
    TableSchema, UniversalType,
};

use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::postgresql::ddl::{quote_literal, PostgreSQLDdl};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::typemap::{is_current_timestamp_default, map_source_type};

/// Destination DDL for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationDdl {
    pub mapping: TableMapping,
    pub create_table: String,
    pub indexes: Vec<IndexDefinition>,
}

/// What [`SchemaTranslator::apply`] actually created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    pub table_created: bool,
    pub indexes_created: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaTranslator {
    ddl: PostgreSQLDdl,
}

impl SchemaTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate `table`. When `change_tracking_column` is given it must name
    /// a column with an orderable type; it receives an index and, for
    /// timestamps, a current-time default.
    pub fn translate(
        &self,
        table: &TableSchema,
        change_tracking_column: Option<&str>,
    ) -> Result<DestinationDdl, SyncError> {
        let mut columns = Vec::with_capacity(table.columns().len());
        for column in table.columns() {
            let target_type =
                map_source_type(&column.source_type).ok_or_else(|| SyncError::UnsupportedType {
                    table: table.name().to_string(),
                    column: column.name.clone(),
                    type_name: column.source_type.to_string(),
                })?;

            let is_tracking = change_tracking_column == Some(column.name.as_str());
            let default = translate_default(
                &target_type,
                column.default.as_deref(),
                is_tracking,
            );
            if default.is_none() && column.default.is_some() {
                tracing::debug!(
                    "Dropping default {:?} of {}.{}: no {} equivalent",
                    column.default,
                    table.name(),
                    column.name,
                    target_type
                );
            }

            columns.push(MappedColumn {
                name: column.name.clone(),
                target_type,
                nullable: column.nullable && !column.primary_key,
                default,
                primary_key: column.primary_key,
            });
        }

        let mut indexes = Vec::new();
        if let Some(tracking) = change_tracking_column {
            let column = columns.iter().find(|c| c.name == tracking).ok_or_else(|| {
                SyncError::schema(format!(
                    "change-tracking column '{tracking}' does not exist in table '{}'",
                    table.name()
                ))
            })?;
            if !column.target_type.is_watermark_capable() {
                return Err(SyncError::schema(format!(
                    "change-tracking column '{}.{tracking}' has type {}, which cannot order changes",
                    table.name(),
                    column.target_type
                )));
            }

            let index_columns = vec![tracking.to_string()];
            let name = self.ddl.index_name(table.name(), &index_columns);
            indexes.push(IndexDefinition {
                sql: self.ddl.to_create_index(&name, table.name(), &index_columns),
                name,
                table: table.name().to_string(),
                columns: index_columns,
            });
        }

        let mapping = TableMapping {
            table: table.name().to_string(),
            columns,
            primary_key: table.primary_key().to_vec(),
            change_tracking_column: change_tracking_column.map(str::to_string),
        };
        let create_table = self.ddl.to_create_table(&mapping);

        Ok(DestinationDdl {
            mapping,
            create_table,
            indexes,
        })
    }

    /// Create the table and its indexes unless they already exist.
    pub async fn apply(
        &self,
        destination: &mut dyn DestinationSession,
        ddl: &DestinationDdl,
    ) -> Result<ApplyOutcome, SyncError> {
        let mut outcome = ApplyOutcome::default();
        let table = &ddl.mapping.table;

        if destination.table_exists(table).await? {
            tracing::debug!("Table {table} already exists, skipping CREATE TABLE");
        } else {
            destination
                .create_table(&ddl.mapping, &ddl.create_table)
                .await?;
            outcome.table_created = true;
        }

        for index in &ddl.indexes {
            if destination.index_exists(&index.name).await? {
                tracing::debug!("Index {} already exists", index.name);
                continue;
            }
            destination.create_index(index).await?;
            outcome.indexes_created.push(index.name.clone());
        }

        Ok(outcome)
    }
}

fn translate_default(
    target: &UniversalType,
    source_default: Option<&str>,
    is_tracking: bool,
) -> Option<ColumnDefault> {
    if *target == UniversalType::Timestamp
        && (is_tracking || source_default.is_some_and(is_current_timestamp_default))
    {
        return Some(ColumnDefault::CurrentTimestamp);
    }

    let raw = source_default?.trim();
    if raw.eq_ignore_ascii_case("null") {
        return None;
    }
    let unquoted = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(raw);

    match target {
        UniversalType::Bool => match unquoted {
            "1" | "b'1'" | "true" | "TRUE" => Some(ColumnDefault::Literal("TRUE".into())),
            "0" | "b'0'" | "false" | "FALSE" => Some(ColumnDefault::Literal("FALSE".into())),
            _ => None,
        },
        UniversalType::Int16
        | UniversalType::Int32
        | UniversalType::Int64
        | UniversalType::Float32
        | UniversalType::Float64
        | UniversalType::Decimal { .. } => unquoted
            .parse::<f64>()
            .ok()
            .map(|_| ColumnDefault::Literal(unquoted.to_string())),
        UniversalType::Char { .. } | UniversalType::VarChar { .. } | UniversalType::Text => {
            Some(ColumnDefault::Literal(quote_literal(unquoted)))
        }
        _ => None,
    }
}

/// Tables ready for migration, and the ones that could not be prepared.
#[derive(Debug, Default)]
pub struct PreparedTables {
    pub mappings: Vec<TableMapping>,
    pub failures: Vec<(String, SyncError)>,
}

/// Describe, translate and apply every table. A failing table is recorded
/// and skipped; it does not stop the others.
pub async fn prepare_tables(
    connections: &ConnectionManager,
    config: &Config,
    tables: &[String],
    reporter: &ProgressReporter,
) -> Result<PreparedTables, SyncError> {
    let translator = SchemaTranslator::new();
    let mut prepared = PreparedTables::default();

    let mut source = connections.acquire_source().await?;
    let mut schemas = Vec::with_capacity(tables.len());
    for table in tables {
        match source.describe_table(table).await {
            Ok(schema) => schemas.push(schema),
            Err(e) => {
                tracing::error!("Cannot introspect table {table}: {e}");
                prepared.failures.push((table.clone(), e));
            }
        }
    }
    source.release().await;

    let mut destination = connections.acquire_destination().await?;
    for schema in schemas {
        let tracking = tracking_column_for(config, &schema);
        let result = match translator.translate(&schema, tracking.as_deref()) {
            Ok(ddl) => translator
                .apply(&mut *destination, &ddl)
                .await
                .map(|outcome| (ddl, outcome)),
            Err(e) => Err(e),
        };

        match result {
            Ok((ddl, outcome)) => {
                reporter.emit(ProgressEvent::SchemaApplied {
                    table: ddl.mapping.table.clone(),
                    table_created: outcome.table_created,
                    indexes_created: outcome.indexes_created.len(),
                });
                prepared.mappings.push(ddl.mapping);
            }
            Err(e) => {
                tracing::error!("Schema translation failed for table {}: {e}", schema.name());
                prepared.failures.push((schema.name().to_string(), e));
            }
        }
    }

    Ok(prepared)
}

/// An explicitly configured column is required to exist; the default column
/// name is used only when the table has it.
fn tracking_column_for(config: &Config, schema: &TableSchema) -> Option<String> {
    let explicit = config
        .tables
        .iter()
        .find(|t| t.name == schema.name())
        .and_then(|t| t.change_tracking_column.clone());
    if explicit.is_some() {
        return explicit;
    }

    let default = &config.sync.change_tracking_column;
    if schema.column(default).is_some() {
        Some(default.clone())
    } else {
        tracing::warn!(
            "Table {} has no '{default}' column; it will be migrated but not incrementally synced",
            schema.name()
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{ColumnDefinition, SourceType};

    fn customers() -> TableSchema {
        TableSchema::new(
            "customers",
            vec![
                ColumnDefinition::new("id", SourceType::new("int")).primary_key(),
                ColumnDefinition::new("name", SourceType::new("varchar").with_length(100))
                    .not_null(),
                ColumnDefinition::new("balance", SourceType::new("decimal").with_precision(12, 2))
                    .with_default("0.00"),
                ColumnDefinition::new("status", SourceType::new("varchar").with_length(10))
                    .with_default("'active'"),
                ColumnDefinition::new("created", SourceType::new("datetime"))
                    .with_default("CURRENT_TIMESTAMP"),
                ColumnDefinition::new("updated_at", SourceType::new("datetime")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_translate_maps_types_and_defaults() {
        let ddl = SchemaTranslator::new()
            .translate(&customers(), Some("updated_at"))
            .unwrap();
        let m = &ddl.mapping;

        assert_eq!(m.column("id").unwrap().target_type, UniversalType::Int32);
        assert!(!m.column("name").unwrap().nullable);
        assert_eq!(
            m.column("balance").unwrap().default,
            Some(ColumnDefault::Literal("0.00".into()))
        );
        assert_eq!(
            m.column("status").unwrap().default,
            Some(ColumnDefault::Literal("'active'".into()))
        );
        assert_eq!(
            m.column("created").unwrap().default,
            Some(ColumnDefault::CurrentTimestamp)
        );
        assert_eq!(
            m.column("updated_at").unwrap().default,
            Some(ColumnDefault::CurrentTimestamp)
        );
        assert!(ddl
            .create_table
            .contains("\"balance\" NUMERIC(12,2) DEFAULT 0.00"));
    }

    #[test]
    fn test_translate_emits_tracking_index() {
        let ddl = SchemaTranslator::new()
            .translate(&customers(), Some("updated_at"))
            .unwrap();
        assert_eq!(ddl.indexes.len(), 1);
        assert_eq!(ddl.indexes[0].name, "idx_customers_updated_at");
        assert_eq!(
            ddl.indexes[0].sql,
            "CREATE INDEX \"idx_customers_updated_at\" ON \"customers\" (\"updated_at\")"
        );
    }

    #[test]
    fn test_no_tracking_column_means_no_index() {
        let ddl = SchemaTranslator::new().translate(&customers(), None).unwrap();
        assert!(ddl.indexes.is_empty());
        assert_eq!(ddl.mapping.change_tracking_column, None);
        assert_eq!(ddl.mapping.column("updated_at").unwrap().default, None);
    }

    #[test]
    fn test_unsupported_type_aborts_table() {
        let schema = TableSchema::new(
            "events",
            vec![
                ColumnDefinition::new("id", SourceType::new("bigint")).primary_key(),
                ColumnDefinition::new("payload", SourceType::new("json")),
            ],
        )
        .unwrap();
        let err = SchemaTranslator::new().translate(&schema, None).unwrap_err();
        match err {
            SyncError::UnsupportedType {
                table,
                column,
                type_name,
            } => {
                assert_eq!(table, "events");
                assert_eq!(column, "payload");
                assert_eq!(type_name, "json");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tracking_column_must_exist_and_be_orderable() {
        let translator = SchemaTranslator::new();
        assert!(matches!(
            translator.translate(&customers(), Some("modified")),
            Err(SyncError::Schema(_))
        ));
        assert!(matches!(
            translator.translate(&customers(), Some("name")),
            Err(SyncError::Schema(_))
        ));
    }

    #[test]
    fn test_unparseable_numeric_default_is_dropped() {
        assert_eq!(
            translate_default(&UniversalType::Int32, Some("nextval()"), false),
            None
        );
        assert_eq!(
            translate_default(&UniversalType::Bool, Some("b'1'"), false),
            Some(ColumnDefault::Literal("TRUE".into()))
        );
        assert_eq!(translate_default(&UniversalType::Text, Some("NULL"), false), None);
    }
}
