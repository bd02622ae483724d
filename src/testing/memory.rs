//! In-memory source and destination.
//!
//! Both sides share their state behind an `Arc`, so a test keeps a clone to
//! seed rows, inject failures and inspect results while the engines hold the
//! other clone through a `ConnectionManager`.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use sync_core::{
    compare_keys, ArchiveEntry, ChangeFilter, DestinationPool, DestinationSession,
    IndexDefinition, LatestChange, ObjectKind, Row, Section, SectionOutcome, SourceConnector,
    SourceSession, SyncError, TableMapping, TableSchema, UniversalValue,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_values(row: &Row, key: &[String]) -> Vec<UniversalValue> {
    key.iter()
        .map(|k| row.get(k).cloned().unwrap_or(UniversalValue::Null))
        .collect()
}

/// Restrict `row` to the mapping's columns, in mapping order.
fn shape(row: &Row, mapping: &TableMapping) -> Row {
    mapping
        .columns
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                row.get(&c.name).cloned().unwrap_or(UniversalValue::Null),
            )
        })
        .collect()
}

/// Definitions the memory destination stores are JSON, not SQL.
fn encode<T: serde::Serialize>(value: &T) -> Result<String, SyncError> {
    serde_json::to_string(value).map_err(|e| SyncError::data(e.to_string()))
}

/// Failures to hand out on calls after the first `skip` ones.
#[derive(Debug, Clone, Copy)]
struct InjectedFailures {
    skip: u64,
    remaining: u32,
    retryable: bool,
}

impl InjectedFailures {
    /// Called once per operation with the operation's sequence number.
    fn take(&mut self, call: u64, what: &str) -> Option<SyncError> {
        if call < self.skip || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(if self.retryable {
            SyncError::transient(format!("injected {what} failure"))
        } else {
            SyncError::data(format!("injected {what} failure"))
        })
    }
}

// ============================================================================
// Source
// ============================================================================

#[derive(Default)]
struct SourceTable {
    schema: Option<TableSchema>,
    rows: Vec<Row>,
}

#[derive(Default)]
struct SourceState {
    tables: BTreeMap<String, SourceTable>,
    connect_failures: u32,
    read_failures: Option<InjectedFailures>,
    reads: u64,
    connections_opened: u64,
    open_sessions: u64,
}

/// A legacy source holding its tables in memory.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `schema` with its initial rows.
    pub fn add_table(&self, schema: TableSchema, rows: Vec<Row>) {
        let name = schema.name().to_string();
        lock(&self.state).tables.insert(
            name,
            SourceTable {
                schema: Some(schema),
                rows,
            },
        );
    }

    /// Insert `row`, or replace the row with the same primary key.
    pub fn upsert_row(&self, table: &str, row: Row) {
        let mut state = lock(&self.state);
        let entry = state.tables.entry(table.to_string()).or_default();
        let key = entry
            .schema
            .as_ref()
            .map(|s| s.primary_key().to_vec())
            .unwrap_or_default();
        let new_key = key_values(&row, &key);
        match entry
            .rows
            .iter()
            .position(|r| compare_keys(&key_values(r, &key), &new_key) == Ordering::Equal)
        {
            Some(index) => entry.rows[index] = row,
            None => entry.rows.push(row),
        }
    }

    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.state)
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Fail the next `count` connection attempts as unavailable.
    pub fn fail_connects(&self, count: u32) {
        lock(&self.state).connect_failures = count;
    }

    /// Fail `count` reads after the first `skip` ones.
    pub fn fail_reads(&self, skip: u64, count: u32, retryable: bool) {
        let mut state = lock(&self.state);
        let skip = state.reads + skip;
        state.read_failures = Some(InjectedFailures {
            skip,
            remaining: count,
            retryable,
        });
    }

    pub fn connections_opened(&self) -> u64 {
        lock(&self.state).connections_opened
    }

    /// Sessions opened and not yet closed or dropped.
    pub fn open_sessions(&self) -> u64 {
        lock(&self.state).open_sessions
    }
}

#[async_trait]
impl SourceConnector for MemorySource {
    async fn connect(&self) -> Result<Box<dyn SourceSession>, SyncError> {
        let mut state = lock(&self.state);
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(SyncError::ConnectionUnavailable(
                "injected connect failure".to_string(),
            ));
        }
        state.connections_opened += 1;
        state.open_sessions += 1;
        Ok(Box::new(MemorySourceSession {
            state: Arc::clone(&self.state),
        }))
    }

    fn describe(&self) -> String {
        "memory://source".to_string()
    }
}

struct MemorySourceSession {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySourceSession {
    fn read(
        &self,
        mapping: &TableMapping,
        admits: impl Fn(&Row, &[UniversalValue]) -> bool,
        order: impl Fn(&(Row, Vec<UniversalValue>), &(Row, Vec<UniversalValue>)) -> Ordering,
        limit: usize,
    ) -> Result<Vec<Row>, SyncError> {
        let mut state = lock(&self.state);
        let call = state.reads;
        state.reads += 1;
        if let Some(failure) = state
            .read_failures
            .as_mut()
            .and_then(|f| f.take(call, "read"))
        {
            return Err(failure);
        }

        let table = state.tables.get(&mapping.table).ok_or_else(|| {
            SyncError::data(format!("table '{}' does not exist", mapping.table))
        })?;
        let mut rows: Vec<(Row, Vec<UniversalValue>)> = table
            .rows
            .iter()
            .map(|r| (r.clone(), key_values(r, &mapping.primary_key)))
            .filter(|(r, key)| admits(r, key.as_slice()))
            .collect();
        rows.sort_by(&order);
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(row, _)| shape(&row, mapping))
            .collect())
    }
}

impl Drop for MemorySourceSession {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

#[async_trait]
impl SourceSession for MemorySourceSession {
    async fn ping(&mut self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>, SyncError> {
        Ok(lock(&self.state).tables.keys().cloned().collect())
    }

    async fn describe_table(&mut self, table: &str) -> Result<TableSchema, SyncError> {
        lock(&self.state)
            .tables
            .get(table)
            .and_then(|t| t.schema.clone())
            .ok_or_else(|| {
                SyncError::schema(format!(
                    "table '{table}' does not exist in the source database"
                ))
            })
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64, SyncError> {
        Ok(lock(&self.state)
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len() as u64))
    }

    async fn read_batch(
        &mut self,
        table: &TableMapping,
        after: Option<&[UniversalValue]>,
        limit: usize,
    ) -> Result<Vec<Row>, SyncError> {
        self.read(
            table,
            |_, key| after.map_or(true, |after| compare_keys(key, after) == Ordering::Greater),
            |a, b| compare_keys(&a.1, &b.1),
            limit,
        )
    }

    async fn read_changes(
        &mut self,
        table: &TableMapping,
        filter: &ChangeFilter,
        limit: usize,
    ) -> Result<Vec<Row>, SyncError> {
        let tracking = |row: &Row| {
            row.get(&filter.column)
                .cloned()
                .unwrap_or(UniversalValue::Null)
        };
        self.read(
            table,
            |row, key| filter.admits(&tracking(row), key),
            |a, b| {
                tracking(&a.0)
                    .compare(&tracking(&b.0))
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| compare_keys(&a.1, &b.1))
            },
            limit,
        )
    }

    async fn close(self: Box<Self>) -> Result<(), SyncError> {
        Ok(())
    }
}

// ============================================================================
// Destination
// ============================================================================

#[derive(Clone)]
struct DestinationTable {
    mapping: TableMapping,
    rows: Vec<Row>,
}

/// Everything a snapshot or a section transaction covers.
#[derive(Clone, Default)]
struct DestinationData {
    tables: BTreeMap<String, DestinationTable>,
    indexes: BTreeMap<String, IndexDefinition>,
    /// Types, functions, triggers and other objects kept as opaque statements.
    objects: Vec<(ObjectKind, String, String)>,
    /// Committed `(archive_id, section)` pairs; not part of any export.
    restore_log: BTreeSet<(String, Section)>,
}

impl DestinationData {
    fn table_mut(&mut self, table: &str) -> Result<&mut DestinationTable, SyncError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| SyncError::data(format!("relation \"{table}\" does not exist")))
    }

    fn upsert(&mut self, mapping: &TableMapping, rows: &[Row]) -> Result<u64, SyncError> {
        let table = self.table_mut(&mapping.table)?;
        for row in rows {
            let key = mapping.key_of(row)?;
            let row = shape(row, &table.mapping);
            match table.rows.iter().position(|r| {
                compare_keys(&key_values(r, &mapping.primary_key), &key) == Ordering::Equal
            }) {
                Some(index) => table.rows[index] = row,
                None => table.rows.push(row),
            }
        }
        Ok(rows.len() as u64)
    }

    fn insert_json(
        &mut self,
        table: &str,
        rows: &[serde_json::Value],
    ) -> Result<(), SyncError> {
        let table = self.table_mut(table)?;
        if !table.rows.is_empty() {
            return Err(SyncError::data(format!(
                "table \"{}\" already holds rows; archive data is only loaded into empty tables",
                table.mapping.table
            )));
        }
        for json in rows {
            let mut row = Row::new();
            for column in &table.mapping.columns {
                let value = json
                    .get(&column.name)
                    .map(|v| UniversalValue::from_json(v, &column.target_type))
                    .transpose()?
                    .unwrap_or(UniversalValue::Null);
                row.insert(column.name.clone(), value);
            }
            table.rows.push(row);
        }
        Ok(())
    }

    fn export(&self, section: Section) -> Result<Vec<ArchiveEntry>, SyncError> {
        let mut entries = Vec::new();
        for (object, name, sql) in &self.objects {
            if object.section() == section {
                entries.push(ArchiveEntry::Definition {
                    object: *object,
                    name: name.clone(),
                    sql: sql.clone(),
                });
            }
        }
        match section {
            Section::PreData => {
                for (name, table) in &self.tables {
                    entries.push(ArchiveEntry::Definition {
                        object: ObjectKind::Table,
                        name: name.clone(),
                        sql: encode(&table.mapping)?,
                    });
                }
            }
            Section::Data => {
                for (name, table) in &self.tables {
                    let mut rows = table.rows.clone();
                    rows.sort_by(|a, b| {
                        compare_keys(
                            &key_values(a, &table.mapping.primary_key),
                            &key_values(b, &table.mapping.primary_key),
                        )
                    });
                    entries.push(ArchiveEntry::TableData {
                        table: name.clone(),
                        columns: table.mapping.columns.iter().map(|c| c.name.clone()).collect(),
                        rows: rows
                            .iter()
                            .map(|row| {
                                let object: serde_json::Map<String, serde_json::Value> = row
                                    .iter()
                                    .map(|(c, v)| (c.to_string(), v.to_json()))
                                    .collect();
                                serde_json::Value::Object(object)
                            })
                            .collect(),
                    });
                }
            }
            Section::PostData => {
                for (name, index) in &self.indexes {
                    entries.push(ArchiveEntry::Definition {
                        object: ObjectKind::Index,
                        name: name.clone(),
                        sql: encode(index)?,
                    });
                }
            }
        }
        Ok(entries)
    }

    fn apply(&mut self, entries: &[ArchiveEntry]) -> Result<(), SyncError> {
        for entry in entries {
            match entry {
                ArchiveEntry::Definition {
                    object: ObjectKind::Table,
                    name,
                    sql,
                } => {
                    let mapping: TableMapping = serde_json::from_str(sql)
                        .map_err(|e| SyncError::data(format!("bad definition of {name}: {e}")))?;
                    self.tables
                        .entry(name.clone())
                        .or_insert_with(|| DestinationTable {
                            mapping,
                            rows: Vec::new(),
                        });
                }
                ArchiveEntry::Definition {
                    object: ObjectKind::Index,
                    name,
                    sql,
                } => {
                    let index: IndexDefinition = serde_json::from_str(sql)
                        .map_err(|e| SyncError::data(format!("bad definition of {name}: {e}")))?;
                    self.table_mut(&index.table)?;
                    self.indexes.entry(name.clone()).or_insert(index);
                }
                ArchiveEntry::Definition { object, name, sql } => {
                    if !self.objects.iter().any(|(_, n, _)| n == name) {
                        self.objects.push((*object, name.clone(), sql.clone()));
                    }
                }
                ArchiveEntry::TableData { table, rows, .. } => self.insert_json(table, rows)?,
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct DestinationState {
    data: DestinationData,
    writes: u64,
    write_failures: Option<InjectedFailures>,
    section_failures: HashMap<Section, InjectedFailures>,
    lost_acknowledgements: HashMap<Section, u32>,
    sections_applied: Vec<Section>,
}

/// A PostgreSQL stand-in with a bounded pool of sessions.
#[derive(Clone)]
pub struct MemoryDestination {
    state: Arc<Mutex<DestinationState>>,
    permits: Arc<Semaphore>,
    max_size: usize,
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::with_pool_size(4)
    }
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `max_size` sessions may be checked out at once.
    pub fn with_pool_size(max_size: usize) -> Self {
        Self {
            state: Arc::default(),
            permits: Arc::new(Semaphore::new(max_size)),
            max_size,
        }
    }

    /// Rows of `table` in primary-key order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let state = lock(&self.state);
        let Some(table) = state.data.tables.get(table) else {
            return Vec::new();
        };
        let key = &table.mapping.primary_key;
        let mut rows = table.rows.clone();
        rows.sort_by(|a, b| compare_keys(&key_values(a, key), &key_values(b, key)));
        rows
    }

    /// The row of `table` whose single-column key equals `key`.
    pub fn row(&self, table: &str, key: &UniversalValue) -> Option<Row> {
        let state = lock(&self.state);
        let table = state.data.tables.get(table)?;
        let column = table.mapping.primary_key.first()?;
        table
            .rows
            .iter()
            .find(|r| r.get(column) == Some(key))
            .cloned()
    }

    pub fn has_table(&self, table: &str) -> bool {
        lock(&self.state).data.tables.contains_key(table)
    }

    pub fn has_index(&self, index: &str) -> bool {
        lock(&self.state).data.indexes.contains_key(index)
    }

    /// Index names in name order.
    pub fn indexes(&self) -> Vec<String> {
        lock(&self.state).data.indexes.keys().cloned().collect()
    }

    /// Store an object other than a table or index, such as a function.
    pub fn add_object(&self, object: ObjectKind, name: &str, sql: &str) {
        lock(&self.state)
            .data
            .objects
            .push((object, name.to_string(), sql.to_string()));
    }

    pub fn objects(&self) -> Vec<(ObjectKind, String)> {
        lock(&self.state)
            .data
            .objects
            .iter()
            .map(|(kind, name, _)| (*kind, name.clone()))
            .collect()
    }

    /// Number of `upsert_rows` calls so far, failed ones included.
    pub fn write_calls(&self) -> u64 {
        lock(&self.state).writes
    }

    /// Fail `count` writes after the next `skip` ones.
    pub fn fail_writes(&self, skip: u64, count: u32, retryable: bool) {
        let mut state = lock(&self.state);
        let skip = state.writes + skip;
        state.write_failures = Some(InjectedFailures {
            skip,
            remaining: count,
            retryable,
        });
    }

    /// Fail the next `count` attempts to apply `section`.
    pub fn fail_section(&self, section: Section, count: u32, retryable: bool) {
        lock(&self.state).section_failures.insert(
            section,
            InjectedFailures {
                skip: 0,
                remaining: count,
                retryable,
            },
        );
    }

    /// Commit the next `count` applications of `section`, then report each as
    /// a lost connection, the way a crash between commit and acknowledgement
    /// looks to the caller.
    pub fn lose_section_ack(&self, section: Section, count: u32) {
        lock(&self.state)
            .lost_acknowledgements
            .insert(section, count);
    }

    /// Sections committed by `apply_section`, in commit order.
    pub fn sections_applied(&self) -> Vec<Section> {
        lock(&self.state).sections_applied.clone()
    }

    /// Sessions currently checked out.
    pub fn in_use(&self) -> usize {
        self.max_size - self.permits.available_permits()
    }
}

#[async_trait]
impl DestinationPool for MemoryDestination {
    async fn acquire(&self) -> Result<Box<dyn DestinationSession>, SyncError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SyncError::ConnectionUnavailable("pool closed".to_string()))?;
        Ok(Box::new(MemoryDestinationSession {
            state: Arc::clone(&self.state),
            _permit: permit,
        }))
    }

    fn max_size(&self) -> usize {
        self.max_size
    }

    fn describe(&self) -> String {
        "memory://destination".to_string()
    }
}

struct MemoryDestinationSession {
    state: Arc<Mutex<DestinationState>>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl DestinationSession for MemoryDestinationSession {
    async fn ping(&mut self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool, SyncError> {
        Ok(lock(&self.state).data.tables.contains_key(table))
    }

    async fn index_exists(&mut self, index: &str) -> Result<bool, SyncError> {
        Ok(lock(&self.state).data.indexes.contains_key(index))
    }

    async fn create_table(
        &mut self,
        mapping: &TableMapping,
        _statement: &str,
    ) -> Result<(), SyncError> {
        let mut state = lock(&self.state);
        if state.data.tables.contains_key(&mapping.table) {
            return Err(SyncError::data(format!(
                "relation \"{}\" already exists",
                mapping.table
            )));
        }
        state.data.tables.insert(
            mapping.table.clone(),
            DestinationTable {
                mapping: mapping.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn create_index(&mut self, index: &IndexDefinition) -> Result<(), SyncError> {
        let mut state = lock(&self.state);
        state.data.table_mut(&index.table)?;
        if state.data.indexes.contains_key(&index.name) {
            return Err(SyncError::data(format!(
                "relation \"{}\" already exists",
                index.name
            )));
        }
        state.data.indexes.insert(index.name.clone(), index.clone());
        Ok(())
    }

    async fn upsert_rows(&mut self, table: &TableMapping, rows: &[Row]) -> Result<u64, SyncError> {
        let mut state = lock(&self.state);
        let call = state.writes;
        state.writes += 1;
        if let Some(failure) = state
            .write_failures
            .as_mut()
            .and_then(|f| f.take(call, "write"))
        {
            return Err(failure);
        }

        // All rows or none.
        let mut data = state.data.clone();
        let written = data.upsert(table, rows)?;
        state.data = data;
        Ok(written)
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64, SyncError> {
        let mut state = lock(&self.state);
        Ok(state.data.table_mut(table)?.rows.len() as u64)
    }

    async fn latest_change(
        &mut self,
        mapping: &TableMapping,
        column: &str,
    ) -> Result<Option<LatestChange>, SyncError> {
        let mut state = lock(&self.state);
        let table = state.data.table_mut(&mapping.table)?;
        let mut latest: Option<LatestChange> = None;
        for row in &table.rows {
            let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let key = key_values(row, &mapping.primary_key);
            match &mut latest {
                Some(current) => match value.compare(&current.value) {
                    Some(Ordering::Greater) => {
                        *current = LatestChange {
                            value: value.clone(),
                            key,
                            rows: 1,
                        };
                    }
                    Some(Ordering::Equal) => {
                        current.rows += 1;
                        if compare_keys(&key, &current.key) == Ordering::Greater {
                            current.key = key;
                        }
                    }
                    _ => {}
                },
                None => {
                    latest = Some(LatestChange {
                        value: value.clone(),
                        key,
                        rows: 1,
                    });
                }
            }
        }
        Ok(latest)
    }

    async fn export_sections(
        &mut self,
        sections: &[Section],
    ) -> Result<Vec<(Section, Vec<ArchiveEntry>)>, SyncError> {
        let snapshot = lock(&self.state).data.clone();
        sections
            .iter()
            .map(|section| Ok((*section, snapshot.export(*section)?)))
            .collect()
    }

    async fn apply_section(
        &mut self,
        archive_id: &str,
        section: Section,
        entries: &[ArchiveEntry],
    ) -> Result<SectionOutcome, SyncError> {
        let mut state = lock(&self.state);
        if let Some(failure) = state
            .section_failures
            .get_mut(&section)
            .and_then(|f| f.take(0, "section"))
        {
            return Err(failure);
        }

        let marker = (archive_id.to_string(), section);
        if state.data.restore_log.contains(&marker) {
            return Ok(SectionOutcome::AlreadyApplied);
        }

        let mut data = state.data.clone();
        data.apply(entries)?;
        data.restore_log.insert(marker);
        state.data = data;
        state.sections_applied.push(section);

        if let Some(remaining) = state
            .lost_acknowledgements
            .get_mut(&section)
            .filter(|n| **n > 0)
        {
            *remaining -= 1;
            return Err(SyncError::transient(format!(
                "connection lost after committing {section}"
            )));
        }
        Ok(SectionOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{MappedColumn, UniversalType};

    fn mapping() -> TableMapping {
        TableMapping {
            table: "items".into(),
            columns: vec![
                MappedColumn::new("id", UniversalType::Int64).primary_key(),
                MappedColumn::new("version", UniversalType::Int64),
            ],
            primary_key: vec!["id".into()],
            change_tracking_column: Some("version".into()),
        }
    }

    fn item(id: i64, version: i64) -> Row {
        Row::new()
            .with("id", UniversalValue::Int64(id))
            .with("version", UniversalValue::Int64(version))
    }

    #[tokio::test]
    async fn test_failed_write_leaves_table_untouched() {
        let destination = MemoryDestination::new();
        let mut session = destination.acquire().await.unwrap();
        session.create_table(&mapping(), "").await.unwrap();
        session.upsert_rows(&mapping(), &[item(1, 1)]).await.unwrap();

        let bad = Row::new().with("version", UniversalValue::Int64(2));
        assert!(session
            .upsert_rows(&mapping(), &[item(2, 2), bad])
            .await
            .is_err());
        assert_eq!(destination.rows("items"), vec![item(1, 1)]);
    }

    #[tokio::test]
    async fn test_latest_change_takes_greatest_key_at_maximum() {
        let destination = MemoryDestination::new();
        let mut session = destination.acquire().await.unwrap();
        session.create_table(&mapping(), "").await.unwrap();
        assert_eq!(session.latest_change(&mapping(), "version").await.unwrap(), None);

        let untracked = Row::new()
            .with("id", UniversalValue::Int64(9))
            .with("version", UniversalValue::Null);
        session
            .upsert_rows(&mapping(), &[item(4, 7), item(2, 7), item(3, 5), untracked])
            .await
            .unwrap();

        let latest = session.latest_change(&mapping(), "version").await.unwrap();
        assert_eq!(
            latest,
            Some(LatestChange {
                value: UniversalValue::Int64(7),
                key: vec![UniversalValue::Int64(4)],
                rows: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_changes_come_in_tracking_then_key_order() {
        let source = MemorySource::new();
        let schema = TableSchema::new(
            "items",
            vec![
                sync_core::ColumnDefinition::new("id", sync_core::SourceType::new("bigint"))
                    .primary_key(),
                sync_core::ColumnDefinition::new("version", sync_core::SourceType::new("bigint")),
            ],
        )
        .unwrap();
        source.add_table(schema, vec![item(3, 5), item(1, 7), item(2, 5)]);

        let mut session = source.connect().await.unwrap();
        let filter = ChangeFilter {
            column: "version".into(),
            mark: None,
            after_key: None,
        };
        let rows = session.read_changes(&mapping(), &filter, 10).await.unwrap();
        assert_eq!(rows, vec![item(2, 5), item(3, 5), item(1, 7)]);
        assert_eq!(source.open_sessions(), 1);
        drop(session);
        assert_eq!(source.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_bounded_by_pool_size() {
        let destination = MemoryDestination::with_pool_size(1);
        let held = destination.acquire().await.unwrap();
        assert_eq!(destination.in_use(), 1);
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            destination.acquire(),
        )
        .await;
        assert!(waited.is_err());
        drop(held);
        assert_eq!(destination.in_use(), 0);
    }
}
