//! Checkpoint file wrapper for storage-agnostic serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Checkpoint, StoredCheckpoint};

/// Storage-agnostic checkpoint wrapper.
///
/// This struct wraps typed checkpoints with metadata for storage and
/// retrieval. The format is designed to be:
/// - Self-describing (includes `kind` and `key` fields)
/// - Extensible (uses JSON Value for checkpoint data)
///
/// # Format
///
/// ```json
/// {
///     "kind": "migration",
///     "key": "customers",
///     "checkpoint": {
///         "rows_completed": 2000,
///         "status": "failed"
///     },
///     "created_at": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Checkpoint kind identifier (e.g., "migration", "watermark")
    pub kind: String,
    /// Unit of work the checkpoint belongs to
    pub key: String,
    /// Serialized checkpoint data as JSON Value
    pub checkpoint: serde_json::Value,
    /// Timestamp when this checkpoint was created
    pub created_at: DateTime<Utc>,
}

impl CheckpointFile {
    /// Create new checkpoint file from a typed checkpoint.
    pub fn new<C: Checkpoint>(key: impl Into<String>, checkpoint: &C) -> anyhow::Result<Self> {
        Ok(Self {
            kind: C::KIND.to_string(),
            key: key.into(),
            checkpoint: serde_json::to_value(checkpoint)?,
            created_at: Utc::now(),
        })
    }

    /// Rebuild the wrapper from what a store returned.
    pub fn from_stored(stored: StoredCheckpoint) -> anyhow::Result<Self> {
        Ok(Self {
            checkpoint: serde_json::from_str(&stored.checkpoint_data)?,
            kind: stored.kind,
            key: stored.key,
            created_at: stored.created_at,
        })
    }

    /// Parse checkpoint into its typed form.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The `kind` doesn't match `C::KIND`
    /// - The checkpoint data can't be deserialized into type `C`
    pub fn parse<C: Checkpoint>(&self) -> anyhow::Result<C> {
        if self.kind != C::KIND {
            anyhow::bail!(
                "Checkpoint type mismatch: expected '{}', found '{}'",
                C::KIND,
                self.kind
            );
        }
        Ok(serde_json::from_value(self.checkpoint.clone())?)
    }

    /// Get the kind of this checkpoint.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Get the timestamp when this checkpoint was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
