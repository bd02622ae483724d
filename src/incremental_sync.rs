//! Watermark-based incremental synchronization.
//!
//! Each cycle asks the source for rows whose change-tracking value is past
//! the table's [`WatermarkCursor`], upserts them in batches, and only then
//! advances and persists the cursor. A cycle that fails part-way leaves the
//! cursor where it was; the rows it already wrote are rewritten idempotently
//! by the next cycle.
//!
//! State machine per table:
//!
//! ```text
//! Idle -> Detecting -> Syncing -> Idle
//!            |            |
//!            +--> Failed <+        (next cycle starts from Failed)
//! any -> Stopped                   (terminal, on shutdown)
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use checkpoint::{Checkpoint, CheckpointManager};
use sync_core::{Row, SyncError, TableMapping, UniversalValue};

use crate::checkpoint_error;
use crate::connection::ConnectionManager;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::retry::RetryPolicy;
use crate::watermark::WatermarkCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Detecting,
    Syncing,
    /// The last cycle failed; the next one starts normally.
    Failed,
    Stopped,
}

/// Counters surfaced to operators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub consecutive_failures: u64,
    pub rows_synced: u64,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Result of one successful cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub table: String,
    pub rows_synced: u64,
    pub watermark: Option<UniversalValue>,
    pub elapsed: Duration,
}

/// Keeps one destination table in step with its source table.
pub struct IncrementalSyncEngine {
    mapping: TableMapping,
    column: String,
    connections: Arc<ConnectionManager>,
    checkpoints: CheckpointManager,
    retry: RetryPolicy,
    batch_size: usize,
    reporter: ProgressReporter,
    state: SyncState,
    stats: SyncStats,
    cursor: Option<WatermarkCursor>,
}

impl IncrementalSyncEngine {
    /// `mapping` must name a change-tracking column.
    pub fn new(
        mapping: TableMapping,
        connections: Arc<ConnectionManager>,
        checkpoints: CheckpointManager,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Result<Self, SyncError> {
        let column = mapping.change_tracking_column.clone().ok_or_else(|| {
            SyncError::Config(format!(
                "table '{}' has no change-tracking column",
                mapping.table
            ))
        })?;
        if batch_size == 0 {
            return Err(SyncError::Config("batch size must be at least 1".into()));
        }
        Ok(Self {
            mapping,
            column,
            connections,
            checkpoints,
            retry,
            batch_size,
            reporter: ProgressReporter::default(),
            state: SyncState::Idle,
            stats: SyncStats::default(),
            cursor: None,
        })
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn table(&self) -> &str {
        &self.mapping.table
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Current in-memory watermark; `None` before the first cycle.
    pub fn watermark(&self) -> Option<&WatermarkCursor> {
        self.cursor.as_ref()
    }

    /// Enter the terminal `Stopped` state. Later cycles are refused.
    pub fn stop(&mut self) {
        self.state = SyncState::Stopped;
    }

    /// Run one detection and sync cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, SyncError> {
        if self.state == SyncState::Stopped {
            return Err(SyncError::Cancelled);
        }
        let started = Instant::now();
        self.state = SyncState::Detecting;

        match self.cycle().await {
            Ok(rows) => {
                self.state = SyncState::Idle;
                self.stats.cycles_completed += 1;
                self.stats.consecutive_failures = 0;
                self.stats.rows_synced += rows;
                self.stats.last_success = Some(Utc::now());

                let watermark = self.cursor.as_ref().and_then(|c| c.mark.clone());
                let outcome = CycleOutcome {
                    table: self.mapping.table.clone(),
                    rows_synced: rows,
                    watermark,
                    elapsed: started.elapsed(),
                };
                self.reporter.emit(ProgressEvent::SyncCycleCompleted {
                    table: outcome.table.clone(),
                    rows,
                    watermark: outcome.watermark.as_ref().map(ToString::to_string),
                    elapsed: outcome.elapsed,
                });
                Ok(outcome)
            }
            Err(e) => {
                self.state = SyncState::Failed;
                self.stats.cycles_failed += 1;
                self.stats.consecutive_failures += 1;
                self.stats.last_error = Some(e.to_string());
                self.reporter.emit(ProgressEvent::SyncCycleFailed {
                    table: self.mapping.table.clone(),
                    error: e.to_string(),
                    consecutive_failures: self.stats.consecutive_failures,
                });
                Err(SyncError::SyncCycleFailed {
                    table: self.mapping.table.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Returns the number of rows written. The persisted and in-memory cursor
    /// only change once every detected row is committed.
    async fn cycle(&mut self) -> Result<u64, SyncError> {
        let start = match &self.cursor {
            Some(cursor) => cursor.clone(),
            None => self.initial_cursor().await?,
        };
        let mut working = start.clone();
        let mut total = 0u64;

        loop {
            let filter = working.filter();
            let rows = self.read_changes(&filter).await?;
            if rows.is_empty() {
                break;
            }
            self.state = SyncState::Syncing;

            let mut observed = Vec::with_capacity(rows.len());
            for row in &rows {
                let value = row.get(&self.column).cloned().unwrap_or(UniversalValue::Null);
                observed.push((value, self.mapping.key_of(row)?));
            }

            self.write(&rows).await?;
            for (value, key) in &observed {
                working.observe(value, key);
            }
            total += rows.len() as u64;
            tracing::debug!(
                table = %self.mapping.table,
                rows = rows.len(),
                watermark = ?working.describe_mark(),
                "Synced change batch"
            );

            if rows.len() < self.batch_size {
                break;
            }
        }

        if working != start {
            self.checkpoints
                .save(&self.mapping.table, &working)
                .await
                .map_err(checkpoint_error)?;
        }
        self.cursor = Some(working);
        Ok(total)
    }

    /// Persisted cursor, or one seeded from the newest row already in the
    /// destination.
    async fn initial_cursor(&self) -> Result<WatermarkCursor, SyncError> {
        let table = &self.mapping.table;
        if let Some(cursor) = self
            .checkpoints
            .load::<WatermarkCursor>(table)
            .await
            .map_err(checkpoint_error)?
        {
            if cursor.column == self.column {
                tracing::info!("Loaded watermark: {}", cursor.to_cli_string());
                return Ok(cursor);
            }
            tracing::warn!(
                "Saved watermark for {table} tracks '{}' instead of '{}'; reseeding",
                cursor.column,
                self.column
            );
        }

        let mut destination = self.connections.acquire_destination().await?;
        let latest = destination.latest_change(&self.mapping, &self.column).await?;
        let cursor = WatermarkCursor::seeded(table.clone(), self.column.clone(), latest);
        tracing::info!("Seeded watermark from destination: {}", cursor.to_cli_string());
        Ok(cursor)
    }

    async fn read_changes(&self, filter: &sync_core::ChangeFilter) -> Result<Vec<Row>, SyncError> {
        let connections = &self.connections;
        let mapping = &self.mapping;
        let limit = self.batch_size;
        self.retry
            .run(&format!("Detect changes in {}", mapping.table), || async move {
                let mut source = connections.acquire_source().await?;
                let result = source.read_changes(mapping, filter, limit).await;
                source.release().await;
                result
            })
            .await
    }

    async fn write(&self, rows: &[Row]) -> Result<u64, SyncError> {
        let connections = &self.connections;
        let mapping = &self.mapping;
        self.retry
            .run(&format!("Upsert changes into {}", mapping.table), || async move {
                let mut destination = connections.acquire_destination().await?;
                destination.upsert_rows(mapping, rows).await
            })
            .await
    }
}

/// Drives one engine per table on a fixed interval.
///
/// Cycles of one table never overlap: a cycle that overruns the interval
/// causes the missed ticks to be skipped. Cancellation is observed between
/// cycles only.
pub struct SyncScheduler {
    interval: Duration,
    cancel: CancellationToken,
}

impl SyncScheduler {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    /// Run until cancelled. Returns each table's final statistics.
    pub async fn run(&self, engines: Vec<IncrementalSyncEngine>) -> Vec<(String, SyncStats)> {
        tracing::info!(
            "Starting incremental sync of {} table(s) every {:?}",
            engines.len(),
            self.interval
        );

        let handles: Vec<_> = engines
            .into_iter()
            .map(|engine| {
                let table = engine.table().to_string();
                let task = tokio::spawn(drive(engine, self.interval, self.cancel.clone()));
                (table, task)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (table, task) in handles {
            match task.await {
                Ok(stats) => results.push((table, stats)),
                Err(e) => {
                    tracing::error!("Sync task for {table} ended abnormally: {e}");
                    results.push((
                        table,
                        SyncStats {
                            last_error: Some(e.to_string()),
                            ..SyncStats::default()
                        },
                    ));
                }
            }
        }
        results
    }

    /// Run exactly one cycle per table, one table after another.
    pub async fn run_once(
        engines: &mut [IncrementalSyncEngine],
    ) -> Vec<(String, Result<CycleOutcome, SyncError>)> {
        let mut results = Vec::with_capacity(engines.len());
        for engine in engines.iter_mut() {
            let outcome = engine.run_cycle().await;
            results.push((engine.table().to_string(), outcome));
        }
        results
    }
}

async fn drive(
    mut engine: IncrementalSyncEngine,
    interval: Duration,
    cancel: CancellationToken,
) -> SyncStats {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = engine.run_cycle().await {
            // Already counted in the stats; the next tick proceeds normally.
            tracing::debug!(table = %engine.table(), "Cycle failed: {e}");
        }
    }

    engine.stop();
    tracing::info!(
        table = %engine.table(),
        cycles_completed = engine.stats().cycles_completed,
        cycles_failed = engine.stats().cycles_failed,
        rows_synced = engine.stats().rows_synced,
        "Incremental sync stopped"
    );
    engine.stats().clone()
}
