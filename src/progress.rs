//! Structured progress events.
//!
//! Engines never format or persist logs themselves. They hand every event to
//! a [`ProgressReporter`], which records it through `tracing` and, when a
//! monitor subscribed, forwards it over a channel.

use std::time::Duration;

use sync_core::Section;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::full_sync::RunStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    SchemaApplied {
        table: String,
        table_created: bool,
        indexes_created: usize,
    },
    MigrationStarted {
        run_id: Uuid,
        table: String,
        rows_planned: u64,
        resumed_rows: u64,
    },
    BatchCompleted {
        table: String,
        batch: u64,
        rows: usize,
        rows_completed: u64,
        elapsed: Duration,
    },
    BatchRetry {
        table: String,
        batch: u64,
        retry: u32,
        error: String,
    },
    MigrationFinished {
        run_id: Uuid,
        table: String,
        status: RunStatus,
        rows_completed: u64,
        source_rows: Option<u64>,
        destination_rows: Option<u64>,
        elapsed: Duration,
    },
    SyncCycleCompleted {
        table: String,
        rows: u64,
        watermark: Option<String>,
        elapsed: Duration,
    },
    SyncCycleFailed {
        table: String,
        error: String,
        consecutive_failures: u64,
    },
    SectionApplied {
        archive_id: Uuid,
        section: Section,
        entries: usize,
        elapsed: Duration,
    },
    SectionSkipped {
        archive_id: Uuid,
        section: Section,
    },
    SectionFailed {
        archive_id: Uuid,
        section: Section,
        error: String,
    },
}

/// Fan-out point for [`ProgressEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Reporter that only logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter that also forwards every event to the returned receiver.
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        log_event(&event);
        if let Some(sender) = &self.sender {
            // A monitor that went away must not stop the engines.
            let _ = sender.send(event);
        }
    }
}

fn log_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::SchemaApplied {
            table,
            table_created,
            indexes_created,
        } => tracing::info!(
            table = %table,
            table_created,
            indexes_created,
            "Destination schema ready"
        ),
        ProgressEvent::MigrationStarted {
            run_id,
            table,
            rows_planned,
            resumed_rows,
        } => tracing::info!(
            run_id = %run_id,
            table = %table,
            rows_planned,
            resumed_rows,
            "Migration started"
        ),
        ProgressEvent::BatchCompleted {
            table,
            batch,
            rows,
            rows_completed,
            elapsed,
        } => tracing::info!(
            table = %table,
            batch,
            rows,
            rows_completed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Batch committed"
        ),
        ProgressEvent::BatchRetry {
            table,
            batch,
            retry,
            error,
        } => tracing::warn!(table = %table, batch, retry, error = %error, "Retrying batch"),
        ProgressEvent::MigrationFinished {
            run_id,
            table,
            status,
            rows_completed,
            source_rows,
            destination_rows,
            elapsed,
        } => tracing::info!(
            run_id = %run_id,
            table = %table,
            status = ?status,
            rows_completed,
            source_rows = ?source_rows,
            destination_rows = ?destination_rows,
            elapsed_ms = elapsed.as_millis() as u64,
            "Migration finished"
        ),
        ProgressEvent::SyncCycleCompleted {
            table,
            rows,
            watermark,
            elapsed,
        } => tracing::info!(
            table = %table,
            rows,
            watermark = ?watermark,
            elapsed_ms = elapsed.as_millis() as u64,
            "Sync cycle completed"
        ),
        ProgressEvent::SyncCycleFailed {
            table,
            error,
            consecutive_failures,
        } => tracing::error!(
            table = %table,
            error = %error,
            consecutive_failures,
            "Sync cycle failed"
        ),
        ProgressEvent::SectionApplied {
            archive_id,
            section,
            entries,
            elapsed,
        } => tracing::info!(
            archive_id = %archive_id,
            section = %section,
            entries,
            elapsed_ms = elapsed.as_millis() as u64,
            "Section applied"
        ),
        ProgressEvent::SectionSkipped {
            archive_id,
            section,
        } => tracing::info!(
            archive_id = %archive_id,
            section = %section,
            "Section already applied, skipping"
        ),
        ProgressEvent::SectionFailed {
            archive_id,
            section,
            error,
        } => tracing::error!(
            archive_id = %archive_id,
            section = %section,
            error = %error,
            "Section failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let (reporter, mut rx) = ProgressReporter::with_channel();
        reporter.emit(ProgressEvent::BatchCompleted {
            table: "orders".into(),
            batch: 1,
            rows: 10,
            rows_completed: 10,
            elapsed: Duration::from_millis(5),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::BatchCompleted { batch: 1, .. }));
    }

    #[test]
    fn test_dropped_subscriber_is_harmless() {
        let (reporter, rx) = ProgressReporter::with_channel();
        drop(rx);
        reporter.emit(ProgressEvent::SectionSkipped {
            archive_id: Uuid::new_v4(),
            section: Section::Data,
        });
    }
}
