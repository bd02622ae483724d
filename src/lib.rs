//! legacy-sync Library
//!
//! Moves a legacy MySQL database onto PostgreSQL and keeps it current while
//! both systems run side by side.
//!
//! # Features
//!
//! - Schema translation: legacy column types, keys and defaults become PostgreSQL DDL
//! - Batch migration: keyset-paginated copies with per-batch retry and resumable checkpoints
//! - Incremental sync: watermark-based change detection on a change-tracking column
//! - Backup and restore: sectioned archives (pre-data, data, post-data) restorable one section at a time
//!
//! # Architecture
//!
//! Every engine is written against the session traits in `sync_core` and
//! reaches the databases through a [`connection::ConnectionManager`]:
//!
//! ```text
//! SchemaTranslator ─┐
//! BatchDataMigrator ─┼── ConnectionManager ──┬── MySQLConnector  (source)
//! IncrementalSync ───┤                       └── PostgreSQLPool   (destination)
//! BackupRestore ─────┘
//! ```
//!
//! The [`testing`] module provides in-memory implementations of both sides.
//!
//! # CLI Usage
//!
//! ```bash
//! # Create destination tables and copy every configured table
//! legacy-sync --config legacy-sync.toml migrate
//!
//! # Keep the destination current until Ctrl-C
//! legacy-sync --config legacy-sync.toml sync
//!
//! # Restore only the data section of an archive
//! legacy-sync restore .legacy-sync/backups/backup_20240101T000000_<id>.jsonl --section data
//! ```

pub mod backup;
pub mod config;
pub mod connection;
pub mod full_sync;
pub mod incremental_sync;
pub mod mysql;
pub mod postgresql;
pub mod progress;
pub mod retry;
pub mod schema;
pub mod testing;
pub mod transform;
pub mod typemap;
pub mod verify;
pub mod watermark;

pub use backup::{BackupRestoreCoordinator, RestoreResult, SectionCheckpoint};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionSettings};
pub use full_sync::{BatchDataMigrator, MigrationRun, RunStatus};
pub use incremental_sync::{IncrementalSyncEngine, SyncScheduler, SyncState};
pub use schema::SchemaTranslator;
pub use sync_core::SyncError;

/// Checkpoint stores report `anyhow` errors; engines surface them as
/// [`SyncError::Checkpoint`] with the full context chain.
pub(crate) fn checkpoint_error(error: anyhow::Error) -> SyncError {
    SyncError::Checkpoint(format!("{error:#}"))
}
