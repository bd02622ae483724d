//! Catalog export and section replay for backups.
//!
//! Definitions are read from `pg_catalog` for the connection's current schema
//! and rendered as statements that can be re-run without failing on objects
//! that already exist.

use std::collections::BTreeMap;

use tokio_postgres::Transaction;

use sync_core::{ArchiveEntry, ObjectKind, Section, SectionOutcome, SyncError};

use super::ddl::{quote_ident, quote_literal};
use super::map_error;

/// Rows per `json_populate_recordset` statement when replaying table data.
pub const RESTORE_CHUNK_ROWS: usize = 1000;

/// Export `sections` from inside one snapshot transaction.
pub async fn export(
    tx: &Transaction<'_>,
    sections: &[Section],
) -> Result<Vec<(Section, Vec<ArchiveEntry>)>, SyncError> {
    let tables = list_tables(tx).await?;
    let mut exported = Vec::with_capacity(sections.len());
    for section in sections {
        let entries = match section {
            Section::PreData => export_pre_data(tx, &tables).await?,
            Section::Data => export_data(tx, &tables).await?,
            Section::PostData => export_post_data(tx).await?,
        };
        tracing::debug!("Exported {} {section} entries", entries.len());
        exported.push((*section, entries));
    }
    Ok(exported)
}

/// Sections committed by earlier restores, recorded in the same transaction
/// as the section itself. Never exported.
pub const RESTORE_LOG_TABLE: &str = "legacy_sync_restore_log";

/// Replay one section's entries on `tx` unless the restore log shows this
/// archive's section was already committed.
pub async fn apply(
    tx: &Transaction<'_>,
    archive_id: &str,
    section: Section,
    entries: &[ArchiveEntry],
) -> Result<SectionOutcome, SyncError> {
    let log = quote_ident(RESTORE_LOG_TABLE);
    tx.batch_execute(&format!(
        "CREATE TABLE IF NOT EXISTS {log} (
             archive_id text NOT NULL,
             section text NOT NULL,
             applied_at timestamptz NOT NULL DEFAULT now(),
             PRIMARY KEY (archive_id, section)
         )"
    ))
    .await
    .map_err(map_error)?;

    let lookup = format!("SELECT 1 FROM {log} WHERE archive_id = $1 AND section = $2 FOR UPDATE");
    let recorded = tx
        .query_opt(lookup.as_str(), &[&archive_id, &section.as_str()])
        .await
        .map_err(map_error)?;
    if recorded.is_some() {
        return Ok(SectionOutcome::AlreadyApplied);
    }

    for entry in entries {
        match entry {
            ArchiveEntry::Definition { sql, .. } => {
                tx.batch_execute(sql).await.map_err(map_error)?;
            }
            ArchiveEntry::TableData {
                table,
                columns,
                rows,
            } => {
                // Keys are only added in post-data, so nothing else stops a
                // second load from duplicating every row.
                ensure_empty(tx, table).await?;
                let sql = insert_from_json(table, columns);
                for chunk in rows.chunks(RESTORE_CHUNK_ROWS) {
                    let payload = serde_json::Value::Array(chunk.to_vec());
                    tx.execute(sql.as_str(), &[&payload])
                        .await
                        .map_err(map_error)?;
                }
            }
        }
        tracing::trace!("Applied {}", entry.describe());
    }

    let record = format!("INSERT INTO {log} (archive_id, section) VALUES ($1, $2)");
    tx.execute(record.as_str(), &[&archive_id, &section.as_str()])
        .await
        .map_err(map_error)?;
    Ok(SectionOutcome::Applied)
}

async fn ensure_empty(tx: &Transaction<'_>, table: &str) -> Result<(), SyncError> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {})", quote_ident(table));
    let populated: bool = tx
        .query_one(sql.as_str(), &[])
        .await
        .map_err(map_error)?
        .get(0);
    if populated {
        return Err(SyncError::data(format!(
            "table \"{table}\" already holds rows; archive data is only loaded into empty tables"
        )));
    }
    Ok(())
}

struct CatalogTable {
    oid: u32,
    name: String,
    columns: Vec<CatalogColumn>,
}

struct CatalogColumn {
    name: String,
    data_type: String,
    not_null: bool,
    default: Option<String>,
}

async fn list_tables(tx: &Transaction<'_>) -> Result<Vec<CatalogTable>, SyncError> {
    let rows = tx
        .query(
            "SELECT c.oid, c.relname
             FROM pg_class c
             JOIN pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = current_schema() AND c.relkind = 'r' AND c.relname <> $1
             ORDER BY c.relname",
            &[&RESTORE_LOG_TABLE],
        )
        .await
        .map_err(map_error)?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let oid: u32 = row.get(0);
        let columns = tx
            .query(
                "SELECT a.attname, format_type(a.atttypid, a.atttypmod), a.attnotnull,
                        pg_get_expr(d.adbin, d.adrelid)
                 FROM pg_attribute a
                 LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
                 WHERE a.attrelid = $1 AND a.attnum > 0 AND NOT a.attisdropped
                 ORDER BY a.attnum",
                &[&oid],
            )
            .await
            .map_err(map_error)?
            .into_iter()
            .map(|c| CatalogColumn {
                name: c.get(0),
                data_type: c.get(1),
                not_null: c.get(2),
                default: c.get(3),
            })
            .collect();
        tables.push(CatalogTable {
            oid,
            name: row.get(1),
            columns,
        });
    }
    Ok(tables)
}

async fn export_pre_data(
    tx: &Transaction<'_>,
    tables: &[CatalogTable],
) -> Result<Vec<ArchiveEntry>, SyncError> {
    let mut entries = Vec::new();

    let enums = tx
        .query(
            "SELECT t.typname, array_agg(e.enumlabel::text ORDER BY e.enumsortorder)
             FROM pg_type t
             JOIN pg_enum e ON e.enumtypid = t.oid
             JOIN pg_namespace n ON n.oid = t.typnamespace
             WHERE n.nspname = current_schema()
             GROUP BY t.typname
             ORDER BY t.typname",
            &[],
        )
        .await
        .map_err(map_error)?;
    for row in enums {
        let name: String = row.get(0);
        let labels: Vec<String> = row.get(1);
        entries.push(definition(ObjectKind::Type, &name, create_enum(&name, &labels)));
    }

    // Functions belonging to extensions are recreated by the extension.
    let functions = tx
        .query(
            "SELECT p.proname, pg_get_functiondef(p.oid)
             FROM pg_proc p
             JOIN pg_namespace n ON n.oid = p.pronamespace
             WHERE n.nspname = current_schema() AND p.prokind = 'f'
             AND NOT EXISTS (
                 SELECT 1 FROM pg_depend d WHERE d.objid = p.oid AND d.deptype = 'e'
             )
             ORDER BY p.proname, p.oid",
            &[],
        )
        .await
        .map_err(map_error)?;
    for row in functions {
        let name: String = row.get(0);
        entries.push(definition(ObjectKind::Function, &name, row.get(1)));
    }

    let sequences = tx
        .query(
            "SELECT sequencename::text, data_type::text, start_value, increment_by,
                    min_value, max_value, cycle
             FROM pg_sequences
             WHERE schemaname = current_schema()
             ORDER BY sequencename",
            &[],
        )
        .await
        .map_err(map_error)?;
    for row in sequences {
        let sequence = SequenceDefinition {
            name: row.get(0),
            data_type: row.get(1),
            start: row.get(2),
            increment: row.get(3),
            min: row.get(4),
            max: row.get(5),
            cycle: row.get(6),
        };
        entries.push(definition(
            ObjectKind::Sequence,
            &sequence.name,
            sequence.to_sql(),
        ));
    }

    for table in tables {
        entries.push(definition(ObjectKind::Table, &table.name, create_table(table)));
    }
    Ok(entries)
}

async fn export_data(
    tx: &Transaction<'_>,
    tables: &[CatalogTable],
) -> Result<Vec<ArchiveEntry>, SyncError> {
    let mut entries = Vec::with_capacity(tables.len());
    for table in tables {
        let sql = format!("SELECT row_to_json(t) FROM {} t", quote_ident(&table.name));
        let rows: Vec<serde_json::Value> = tx
            .query(sql.as_str(), &[])
            .await
            .map_err(map_error)?
            .iter()
            .map(|row| row.get(0))
            .collect();
        tracing::debug!("Exported {} rows of {} (oid {})", rows.len(), table.name, table.oid);
        entries.push(ArchiveEntry::TableData {
            table: table.name.clone(),
            columns: table.columns.iter().map(|c| c.name.clone()).collect(),
            rows,
        });
    }

    // Sequences that were never advanced have no position to restore.
    let positions = tx
        .query(
            "SELECT sequencename::text, last_value
             FROM pg_sequences
             WHERE schemaname = current_schema() AND last_value IS NOT NULL
             ORDER BY sequencename",
            &[],
        )
        .await
        .map_err(map_error)?;
    for row in positions {
        let name: String = row.get(0);
        let value: i64 = row.get(1);
        entries.push(definition(
            ObjectKind::SequenceValue,
            &name,
            set_sequence_value(&name, value),
        ));
    }
    Ok(entries)
}

async fn export_post_data(tx: &Transaction<'_>) -> Result<Vec<ArchiveEntry>, SyncError> {
    let mut entries = Vec::new();

    // Foreign keys last, so every referenced key exists when they are added.
    let constraints = tx
        .query(
            "SELECT c.conname::text, cl.relname::text, pg_get_constraintdef(c.oid)
             FROM pg_constraint c
             JOIN pg_class cl ON cl.oid = c.conrelid
             JOIN pg_namespace n ON n.oid = cl.relnamespace
             WHERE n.nspname = current_schema() AND c.contype IN ('p', 'u', 'c', 'x', 'f')
             AND cl.relname <> $1
             ORDER BY c.contype = 'f', cl.relname, c.conname",
            &[&RESTORE_LOG_TABLE],
        )
        .await
        .map_err(map_error)?;
    for row in constraints {
        let name: String = row.get(0);
        let table: String = row.get(1);
        let def: String = row.get(2);
        entries.push(definition(
            ObjectKind::Constraint,
            &format!("{table}.{name}"),
            add_constraint(&table, &name, &def),
        ));
    }

    // Indexes backing a constraint are recreated by the constraint.
    let indexes = tx
        .query(
            "SELECT i.indexname::text, i.indexdef
             FROM pg_indexes i
             WHERE i.schemaname = current_schema() AND i.tablename <> $1
             AND NOT EXISTS (
                 SELECT 1 FROM pg_constraint c
                 JOIN pg_class ic ON ic.oid = c.conindid
                 WHERE ic.relname = i.indexname
                 AND ic.relnamespace = (SELECT oid FROM pg_namespace WHERE nspname = i.schemaname)
             )
             ORDER BY i.tablename, i.indexname",
            &[&RESTORE_LOG_TABLE],
        )
        .await
        .map_err(map_error)?;
    for row in indexes {
        let name: String = row.get(0);
        let def: String = row.get(1);
        entries.push(definition(ObjectKind::Index, &name, create_index_if_missing(&def)));
    }

    let triggers = tx
        .query(
            "SELECT t.tgname::text, pg_get_triggerdef(t.oid)
             FROM pg_trigger t
             JOIN pg_class c ON c.oid = t.tgrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = current_schema() AND NOT t.tgisinternal
             ORDER BY c.relname, t.tgname",
            &[],
        )
        .await
        .map_err(map_error)?;
    for row in triggers {
        let name: String = row.get(0);
        let def: String = row.get(1);
        entries.push(definition(ObjectKind::Trigger, &name, tolerate_existing(&def)));
    }
    Ok(entries)
}

fn definition(object: ObjectKind, name: &str, sql: String) -> ArchiveEntry {
    ArchiveEntry::Definition {
        object,
        name: name.to_string(),
        sql,
    }
}

/// Wrap `statement` so errors about an already existing object are ignored.
fn tolerate_existing(statement: &str) -> String {
    format!(
        "DO $restore$ BEGIN {statement}; \
         EXCEPTION WHEN duplicate_object OR duplicate_table OR invalid_table_definition THEN NULL; \
         END $restore$"
    )
}

fn create_enum(name: &str, labels: &[String]) -> String {
    let labels: Vec<String> = labels.iter().map(|l| quote_literal(l)).collect();
    tolerate_existing(&format!(
        "CREATE TYPE {} AS ENUM ({})",
        quote_ident(name),
        labels.join(", ")
    ))
}

struct SequenceDefinition {
    name: String,
    data_type: String,
    start: i64,
    increment: i64,
    min: i64,
    max: i64,
    cycle: bool,
}

impl SequenceDefinition {
    fn to_sql(&self) -> String {
        format!(
            "CREATE SEQUENCE IF NOT EXISTS {} AS {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START WITH {} {}",
            quote_ident(&self.name),
            self.data_type,
            self.increment,
            self.min,
            self.max,
            self.start,
            if self.cycle { "CYCLE" } else { "NO CYCLE" }
        )
    }
}

fn set_sequence_value(name: &str, value: i64) -> String {
    format!(
        "SELECT setval({}, {value}, true)",
        quote_literal(&quote_ident(name))
    )
}

fn create_table(table: &CatalogTable) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("  {} {}", quote_ident(&c.name), c.data_type);
            if c.not_null {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = &c.default {
                def.push_str(" DEFAULT ");
                def.push_str(default);
            }
            def
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        quote_ident(&table.name),
        columns.join(",\n")
    )
}

fn add_constraint(table: &str, name: &str, def: &str) -> String {
    tolerate_existing(&format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {def}",
        quote_ident(table),
        quote_ident(name)
    ))
}

/// `pg_get_indexdef` output with `IF NOT EXISTS` added.
fn create_index_if_missing(def: &str) -> String {
    for prefix in ["CREATE UNIQUE INDEX ", "CREATE INDEX "] {
        if let Some(rest) = def.strip_prefix(prefix) {
            if rest.starts_with("IF NOT EXISTS ") {
                return def.to_string();
            }
            return format!("{prefix}IF NOT EXISTS {rest}");
        }
    }
    def.to_string()
}

/// Insert rows given as a JSON array, letting the server cast each field to
/// its column type.
fn insert_from_json(table: &str, columns: &[String]) -> String {
    let table = quote_ident(table);
    let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let columns = columns.join(", ");
    format!(
        "INSERT INTO {table} ({columns}) SELECT {columns} FROM json_populate_recordset(NULL::{table}, $1::json)"
    )
}

/// Entry counts per object kind, for logs.
pub fn summarize(entries: &[ArchiveEntry]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for entry in entries {
        let kind = match entry {
            ArchiveEntry::Definition { object, .. } => match object {
                ObjectKind::Type => "types",
                ObjectKind::Function => "functions",
                ObjectKind::Sequence => "sequences",
                ObjectKind::Table => "tables",
                ObjectKind::SequenceValue => "sequence values",
                ObjectKind::Constraint => "constraints",
                ObjectKind::Index => "indexes",
                ObjectKind::Trigger => "triggers",
            },
            ArchiveEntry::TableData { .. } => "table data",
        };
        *counts.entry(kind).or_insert(0) += 1;
    }
    counts
}
