//! Session traits: the seam between the engines and concrete drivers.
//!
//! Engines only ever talk to these traits. The MySQL source and the
//! PostgreSQL destination implement them over real drivers; the in-memory
//! doubles in `legacy_sync::testing` implement them for tests.

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::archive::{ArchiveEntry, Section};
use crate::error::SyncError;
use crate::schema::{IndexDefinition, TableMapping, TableSchema};
use crate::values::{compare_keys, Row, UniversalValue};

/// Which changed rows a sync cycle asks the source for.
///
/// Rows are returned ordered by `(column, primary key)`. A row qualifies when
/// its change-tracking value is strictly greater than `mark`, or equal to it
/// with a primary key greater than `after_key`. Without a mark every row with
/// a non-NULL tracking value qualifies; a mark without `after_key` admits
/// rows equal to the mark.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub column: String,
    pub mark: Option<UniversalValue>,
    pub after_key: Option<Vec<UniversalValue>>,
}

impl ChangeFilter {
    /// Evaluate the filter against one row's tracking value and key.
    pub fn admits(&self, tracking: &UniversalValue, key: &[UniversalValue]) -> bool {
        if tracking.is_null() {
            return false;
        }
        let Some(mark) = &self.mark else {
            return true;
        };
        match tracking.compare(mark) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => match &self.after_key {
                Some(after) => compare_keys(key, after) == Ordering::Greater,
                None => true,
            },
            _ => false,
        }
    }
}

/// The newest change already present in a destination table: the greatest
/// non-NULL tracking value, the greatest primary key among rows holding it,
/// and how many rows hold it.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestChange {
    pub value: UniversalValue,
    pub key: Vec<UniversalValue>,
    pub rows: u64,
}

/// What `apply_section` did to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionOutcome {
    Applied,
    /// An earlier restore of the same archive already committed the section.
    AlreadyApplied,
}

/// A short-lived connection to the legacy source.
#[async_trait]
pub trait SourceSession: Send {
    /// Trivial round-trip.
    async fn ping(&mut self) -> Result<(), SyncError>;

    /// Base tables of the source database, sorted by name.
    async fn list_tables(&mut self) -> Result<Vec<String>, SyncError>;

    /// Introspect one table.
    async fn describe_table(&mut self, table: &str) -> Result<TableSchema, SyncError>;

    async fn count_rows(&mut self, table: &str) -> Result<u64, SyncError>;

    /// Up to `limit` rows with a primary key greater than `after`, ordered by
    /// primary key.
    async fn read_batch(
        &mut self,
        table: &TableMapping,
        after: Option<&[UniversalValue]>,
        limit: usize,
    ) -> Result<Vec<Row>, SyncError>;

    /// Up to `limit` rows admitted by `filter`, ordered by tracking value then
    /// primary key.
    async fn read_changes(
        &mut self,
        table: &TableMapping,
        filter: &ChangeFilter,
        limit: usize,
    ) -> Result<Vec<Row>, SyncError>;

    /// Close the connection gracefully.
    async fn close(self: Box<Self>) -> Result<(), SyncError>;
}

/// Opens source sessions. The legacy driver is not pooled.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SourceSession>, SyncError>;

    /// Endpoint description for logs, without credentials.
    fn describe(&self) -> String;
}

/// A pooled connection to the destination. Dropping it returns it to the pool.
#[async_trait]
pub trait DestinationSession: Send {
    async fn ping(&mut self) -> Result<(), SyncError>;

    async fn table_exists(&mut self, table: &str) -> Result<bool, SyncError>;

    async fn index_exists(&mut self, index: &str) -> Result<bool, SyncError>;

    /// Execute `statement`, the rendered DDL for `mapping`.
    async fn create_table(
        &mut self,
        mapping: &TableMapping,
        statement: &str,
    ) -> Result<(), SyncError>;

    async fn create_index(&mut self, index: &IndexDefinition) -> Result<(), SyncError>;

    /// Insert-or-overwrite `rows` by primary key inside one transaction.
    /// Either every row is committed or none is.
    async fn upsert_rows(&mut self, table: &TableMapping, rows: &[Row]) -> Result<u64, SyncError>;

    async fn count_rows(&mut self, table: &str) -> Result<u64, SyncError>;

    /// Newest change by `column`, `None` when no row has a tracking value.
    async fn latest_change(
        &mut self,
        table: &TableMapping,
        column: &str,
    ) -> Result<Option<LatestChange>, SyncError>;

    /// Serialize the requested sections from one consistent snapshot.
    async fn export_sections(
        &mut self,
        sections: &[Section],
    ) -> Result<Vec<(Section, Vec<ArchiveEntry>)>, SyncError>;

    /// Apply one section's entries inside one transaction that also records
    /// `(archive_id, section)` in the destination. A section already recorded
    /// there is left untouched. Table data is only loaded into empty tables.
    async fn apply_section(
        &mut self,
        archive_id: &str,
        section: Section,
        entries: &[ArchiveEntry],
    ) -> Result<SectionOutcome, SyncError>;
}

/// Bounded pool of destination sessions.
#[async_trait]
pub trait DestinationPool: Send + Sync {
    /// Wait for a free session. Callers bound the wait with their own deadline.
    async fn acquire(&self) -> Result<Box<dyn DestinationSession>, SyncError>;

    /// Maximum number of concurrently checked-out sessions.
    fn max_size(&self) -> usize;

    /// Endpoint description for logs, without credentials.
    fn describe(&self) -> String;
}
