//! Checkpoint storage configuration.

use std::path::PathBuf;
use std::sync::Arc;

use crate::{CheckpointStore, FilesystemStore, NullStore};

/// Where checkpoints are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointStorage {
    /// Checkpointing disabled; nothing is resumable.
    Disabled,

    /// JSON files in a directory.
    Filesystem {
        /// Directory holding `checkpoint_{kind}_{key}.json` files
        dir: PathBuf,
    },
}

impl Default for CheckpointStorage {
    fn default() -> Self {
        Self::Filesystem {
            dir: PathBuf::from(".legacy-sync/checkpoints"),
        }
    }
}

impl CheckpointStorage {
    /// Filesystem storage in `dir`.
    pub fn filesystem(dir: impl Into<PathBuf>) -> Self {
        Self::Filesystem { dir: dir.into() }
    }

    /// Build the store this configuration describes.
    pub fn build_store(&self) -> Arc<dyn CheckpointStore> {
        match self {
            Self::Disabled => Arc::new(NullStore),
            Self::Filesystem { dir } => Arc::new(FilesystemStore::new(dir.clone())),
        }
    }
}
