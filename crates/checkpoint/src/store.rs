//! Checkpoint storage trait and types
//!
//! This module defines the CheckpointStore trait for backend-agnostic
//! checkpoint storage operations, plus shared types.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Checkpoint;

/// Checkpoint identifier for storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointID {
    /// Checkpoint kind (e.g., "migration", "watermark", "restore")
    pub kind: String,
    /// Unit of work within the kind (a table name, `{archive_id}_{section}`)
    pub key: String,
}

impl CheckpointID {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Id of the checkpoint of type `C` stored under `key`.
    pub fn of<C: Checkpoint>(key: impl Into<String>) -> Self {
        Self::new(C::KIND, key)
    }

    /// Filesystem-safe name: `checkpoint_{kind}_{key}` with every character
    /// outside `[A-Za-z0-9._-]` replaced by `_`.
    pub fn file_stem(&self) -> String {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        };
        format!("checkpoint_{}_{}", sanitize(&self.kind), sanitize(&self.key))
    }
}

/// Checkpoint data stored in backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Serialized checkpoint (JSON)
    pub checkpoint_data: String,
    /// Checkpoint kind for validation
    pub kind: String,
    /// Checkpoint key for validation
    pub key: String,
    /// Timestamp when checkpoint was created
    pub created_at: DateTime<Utc>,
}

/// Trait for checkpoint storage operations.
///
/// A store keeps at most one checkpoint per id; storing again replaces it.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store a checkpoint in the storage backend.
    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()>;

    /// Read a checkpoint from the storage backend.
    ///
    /// Returns None if the checkpoint doesn't exist.
    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<StoredCheckpoint>>;

    /// Remove a checkpoint. Removing a missing checkpoint is not an error.
    async fn remove_checkpoint(&self, id: &CheckpointID) -> Result<()>;

    /// All checkpoints of one kind, ordered by key.
    async fn list_checkpoints(&self, kind: &str) -> Result<Vec<StoredCheckpoint>>;
}
