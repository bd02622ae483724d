//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// Filesystem implementation of CheckpointStore trait.
///
/// Stores each checkpoint as `{dir}/checkpoint_{kind}_{key}.json`. Writes go
/// to a temporary file in the same directory which is then renamed over the
/// target, so a crash leaves either the previous checkpoint or the new one.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &CheckpointID) -> PathBuf {
        self.dir.join(format!("{}.json", id.file_stem()))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create checkpoint directory {}", self.dir.display())
        })?;

        let stored = StoredCheckpoint {
            checkpoint_data,
            kind: id.kind.clone(),
            key: id.key.clone(),
            created_at: Utc::now(),
        };

        let filename = self.path_for(id);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(serde_json::to_string_pretty(&stored)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&filename)
            .with_context(|| format!("Failed to persist checkpoint {}", filename.display()))?;

        tracing::debug!("Stored checkpoint to {}", filename.display());
        Ok(())
    }

    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<StoredCheckpoint>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        let stored: StoredCheckpoint = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint file {}", path.display()))?;

        if stored.kind != id.kind || stored.key != id.key {
            anyhow::bail!(
                "Checkpoint file {} belongs to {}/{}, expected {}/{}",
                path.display(),
                stored.kind,
                stored.key,
                id.kind,
                id.key
            );
        }
        Ok(Some(stored))
    }

    async fn remove_checkpoint(&self, id: &CheckpointID) -> Result<()> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove checkpoint {}", path.display())),
        }
    }

    async fn list_checkpoints(&self, kind: &str) -> Result<Vec<StoredCheckpoint>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if !(filename.starts_with("checkpoint_") && filename.ends_with(".json")) {
                continue;
            }
            let content = std::fs::read_to_string(entry.path())?;
            match serde_json::from_str::<StoredCheckpoint>(&content) {
                Ok(stored) if stored.kind == kind => found.push(stored),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Skipping unreadable checkpoint file {filename}: {e}");
                }
            }
        }
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }
}
