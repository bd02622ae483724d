//! Batched bulk migration from the source to the destination.
//!
//! A table is read in primary-key order, one keyset-paginated batch at a
//! time, and every batch is upserted inside its own destination transaction.
//! After each committed batch the [`MigrationRun`] is checkpointed with the
//! last key written, so a failed or cancelled run resumes exactly where the
//! last commit left off.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use checkpoint::{Checkpoint, CheckpointManager};
use sync_core::{Row, SyncError, TableMapping, UniversalValue};

use crate::checkpoint_error;
use crate::connection::ConnectionManager;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::retry::RetryPolicy;
use crate::transform::{validate_shape, TransformRegistry};

/// Terminal and in-flight states of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    /// Stopped at a batch boundary by cancellation; resumable.
    PartiallyCompleted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::PartiallyCompleted => "partially completed",
        };
        f.write_str(s)
    }
}

/// One execution of the migrator for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRun {
    pub run_id: Uuid,
    pub table: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub rows_planned: u64,
    pub rows_completed: u64,
    pub batch_size: usize,
    pub batches_completed: u64,
    /// Batch retries consumed so far.
    pub retries: u64,
    /// Primary key of the last committed row; extraction resumes after it.
    pub last_key: Option<Vec<UniversalValue>>,
    pub source_rows: Option<u64>,
    pub destination_rows: Option<u64>,
    pub error: Option<String>,
    /// Run this one continued from.
    pub resumed_from: Option<Uuid>,
}

impl MigrationRun {
    fn start(table: &str, batch_size: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            table: table.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            rows_planned: 0,
            rows_completed: 0,
            batch_size,
            batches_completed: 0,
            retries: 0,
            last_key: None,
            source_rows: None,
            destination_rows: None,
            error: None,
            resumed_from: None,
        }
    }

    /// Continue `previous` from its last committed key.
    fn resume(previous: &MigrationRun, batch_size: usize) -> Self {
        let mut run = Self::start(&previous.table, batch_size);
        run.rows_completed = previous.rows_completed;
        run.batches_completed = previous.batches_completed;
        run.last_key = previous.last_key.clone();
        run.resumed_from = Some(previous.run_id);
        run
    }

    pub fn is_resumable(&self) -> bool {
        self.status != RunStatus::Completed
    }
}

impl Checkpoint for MigrationRun {
    const KIND: &'static str = "migration";

    fn to_cli_string(&self) -> String {
        let resume = match &self.last_key {
            Some(key) => key
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            None => "start".to_string(),
        };
        format!(
            "{} {}: {}/{} rows in {} batch(es), resume after {resume}",
            self.table, self.status, self.rows_completed, self.rows_planned, self.batches_completed
        )
    }
}

/// Moves whole tables from the source to the destination.
pub struct BatchDataMigrator {
    connections: Arc<ConnectionManager>,
    checkpoints: CheckpointManager,
    retry: RetryPolicy,
    transforms: TransformRegistry,
    cancel: CancellationToken,
    reporter: ProgressReporter,
}

impl BatchDataMigrator {
    pub fn new(
        connections: Arc<ConnectionManager>,
        checkpoints: CheckpointManager,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            connections,
            checkpoints,
            retry,
            transforms: TransformRegistry::default(),
            cancel: CancellationToken::new(),
            reporter: ProgressReporter::default(),
        }
    }

    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    /// Stop at the next batch boundary once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Forget any saved run for `table` so the next migration starts over.
    pub async fn discard_checkpoint(&self, table: &str) -> Result<(), SyncError> {
        self.checkpoints
            .remove::<MigrationRun>(table)
            .await
            .map_err(checkpoint_error)
    }

    /// The saved run for `table`, if any.
    pub async fn last_run(&self, table: &str) -> Result<Option<MigrationRun>, SyncError> {
        self.checkpoints
            .load::<MigrationRun>(table)
            .await
            .map_err(checkpoint_error)
    }

    /// Migrate several tables with at most `workers` in flight. Results keep
    /// the order of `tables`.
    pub async fn migrate_all(
        &self,
        tables: &[TableMapping],
        batch_size: usize,
        workers: usize,
    ) -> Vec<(String, Result<MigrationRun, SyncError>)> {
        stream::iter(tables)
            .map(|mapping| async move {
                (
                    mapping.table.clone(),
                    self.migrate(mapping, batch_size).await,
                )
            })
            .buffered(workers.max(1))
            .collect()
            .await
    }

    /// Migrate one table.
    ///
    /// Operational failures (exhausted retries, data errors, cancellation)
    /// are reported through the returned run's status. `Err` is returned only
    /// when the run could not be set up or its checkpoint not persisted.
    pub async fn migrate(
        &self,
        mapping: &TableMapping,
        batch_size: usize,
    ) -> Result<MigrationRun, SyncError> {
        if batch_size == 0 {
            return Err(SyncError::Config("batch size must be at least 1".into()));
        }
        let table = mapping.table.as_str();
        let started = Instant::now();

        let mut run = match self.last_run(table).await? {
            Some(previous) if previous.is_resumable() => {
                tracing::info!("Resuming migration of {table}: {}", previous.to_cli_string());
                MigrationRun::resume(&previous, batch_size)
            }
            _ => MigrationRun::start(table, batch_size),
        };

        run.rows_planned = match self.count_source(table).await {
            Ok(count) => count,
            Err(e) => return self.finish_failed(run, e, started).await,
        };
        self.save(&run).await?;
        self.reporter.emit(ProgressEvent::MigrationStarted {
            run_id: run.run_id,
            table: table.to_string(),
            rows_planned: run.rows_planned,
            resumed_rows: run.rows_completed,
        });

        let transform = self.transforms.get(table);
        let mut shape_checked = false;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    "Migration of {table} cancelled after {} batch(es)",
                    run.batches_completed
                );
                run.status = RunStatus::PartiallyCompleted;
                run.finished_at = Some(Utc::now());
                self.save(&run).await?;
                self.emit_finished(&run, started);
                return Ok(run);
            }

            let batch_started = Instant::now();
            let batch = run.batches_completed + 1;

            let rows = match self.read_batch(mapping, run.last_key.as_deref(), batch_size).await {
                Ok(rows) => rows,
                Err(e) => return self.finish_failed(run, e, started).await,
            };
            if rows.is_empty() {
                break;
            }
            let fetched = rows.len();

            // The resume point comes from the source key, before any transform.
            let last_key = match rows.last().map(|row| mapping.key_of(row)) {
                Some(Ok(key)) => key,
                Some(Err(e)) => return self.finish_failed(run, e, started).await,
                None => break,
            };

            let rows: Vec<Row> = match &transform {
                Some(transform) => rows.into_iter().map(|row| transform(row)).collect(),
                None => rows,
            };
            if transform.is_some() && !shape_checked {
                if let Some(first) = rows.first() {
                    if let Err(e) = validate_shape(mapping, first) {
                        return self.finish_failed(run, e, started).await;
                    }
                }
                shape_checked = true;
            }

            if let Err(e) = self.write_batch(mapping, batch, &rows, &mut run).await {
                return self.finish_failed(run, e, started).await;
            }

            run.rows_completed += fetched as u64;
            run.batches_completed = batch;
            run.last_key = Some(last_key);
            self.save(&run).await?;
            self.reporter.emit(ProgressEvent::BatchCompleted {
                table: table.to_string(),
                batch,
                rows: fetched,
                rows_completed: run.rows_completed,
                elapsed: batch_started.elapsed(),
            });

            if fetched < batch_size {
                break;
            }
        }

        run.source_rows = self.count_source(table).await.ok();
        run.destination_rows = self.count_destination(table).await.ok();
        run.status = RunStatus::Completed;
        run.finished_at = Some(Utc::now());
        self.save(&run).await?;
        self.emit_finished(&run, started);
        Ok(run)
    }

    async fn read_batch(
        &self,
        mapping: &TableMapping,
        after: Option<&[UniversalValue]>,
        limit: usize,
    ) -> Result<Vec<Row>, SyncError> {
        let connections = &self.connections;
        self.retry
            .run(&format!("Read batch from {}", mapping.table), || async move {
                let mut source = connections.acquire_source().await?;
                let result = source.read_batch(mapping, after, limit).await;
                source.release().await;
                result
            })
            .await
    }

    /// Write one batch, retrying the whole transaction on retryable errors.
    async fn write_batch(
        &self,
        mapping: &TableMapping,
        batch: u64,
        rows: &[Row],
        run: &mut MigrationRun,
    ) -> Result<(), SyncError> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.connections.acquire_destination().await {
                Ok(mut destination) => destination.upsert_rows(mapping, rows).await,
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(_) => return Ok(()),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(SyncError::BatchWriteFailed {
                    table: mapping.table.clone(),
                    batch,
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            run.retries += 1;
            self.reporter.emit(ProgressEvent::BatchRetry {
                table: mapping.table.clone(),
                batch,
                retry: attempt,
                error: error.to_string(),
            });
            tokio::time::sleep(self.retry.backoff_for(attempt)).await;
        }
    }

    async fn count_source(&self, table: &str) -> Result<u64, SyncError> {
        let mut source = self.connections.acquire_source().await?;
        let result = source.count_rows(table).await;
        source.release().await;
        result
    }

    async fn count_destination(&self, table: &str) -> Result<u64, SyncError> {
        let mut destination = self.connections.acquire_destination().await?;
        destination.count_rows(table).await
    }

    async fn finish_failed(
        &self,
        mut run: MigrationRun,
        error: SyncError,
        started: Instant,
    ) -> Result<MigrationRun, SyncError> {
        tracing::error!(
            "Migration of {} failed after {} committed batch(es): {error}",
            run.table,
            run.batches_completed
        );
        run.status = RunStatus::Failed;
        run.error = Some(error.to_string());
        run.finished_at = Some(Utc::now());
        self.save(&run).await?;
        self.emit_finished(&run, started);
        Ok(run)
    }

    async fn save(&self, run: &MigrationRun) -> Result<(), SyncError> {
        self.checkpoints
            .save(&run.table, run)
            .await
            .map_err(checkpoint_error)
    }

    fn emit_finished(&self, run: &MigrationRun, started: Instant) {
        self.reporter.emit(ProgressEvent::MigrationFinished {
            run_id: run.run_id,
            table: run.table.clone(),
            status: run.status,
            rows_completed: run.rows_completed,
            source_rows: run.source_rows,
            destination_rows: run.destination_rows,
            elapsed: started.elapsed(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_carries_progress() {
        let mut previous = MigrationRun::start("orders", 100);
        previous.status = RunStatus::Failed;
        previous.rows_completed = 200;
        previous.batches_completed = 2;
        previous.last_key = Some(vec![UniversalValue::Int64(200)]);

        let run = MigrationRun::resume(&previous, 100);
        assert_ne!(run.run_id, previous.run_id);
        assert_eq!(run.resumed_from, Some(previous.run_id));
        assert_eq!(run.rows_completed, 200);
        assert_eq!(run.batches_completed, 2);
        assert_eq!(run.last_key, previous.last_key);
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_completed_runs_are_not_resumed() {
        let mut run = MigrationRun::start("orders", 10);
        assert!(run.is_resumable());
        run.status = RunStatus::Completed;
        assert!(!run.is_resumable());
    }

    #[test]
    fn test_checkpoint_round_trip_through_json() {
        let mut run = MigrationRun::start("orders", 10);
        run.last_key = Some(vec![UniversalValue::Int64(7), UniversalValue::Text("b".into())]);
        let json = serde_json::to_string(&run).unwrap();
        let back: MigrationRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
        assert!(run.to_cli_string().ends_with("resume after 7,b"));
    }
}
