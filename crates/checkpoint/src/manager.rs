//! Typed checkpoint manager.

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    store::CheckpointStore, Checkpoint, CheckpointFile, CheckpointID, CheckpointStorage,
    StoredCheckpoint,
};

/// Manager for saving and loading typed checkpoints.
///
/// # Example
///
/// ```rust,ignore
/// use checkpoint::{CheckpointManager, CheckpointStorage};
///
/// let manager = CheckpointManager::from_storage(&CheckpointStorage::filesystem("/tmp/cp"));
///
/// // Save a checkpoint
/// manager.save("customers", &run).await?;
///
/// // Load a checkpoint
/// let loaded: Option<MigrationRun> = manager.load("customers").await?;
/// ```
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    /// Create a manager over an existing store.
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Create a manager for the configured storage backend.
    pub fn from_storage(storage: &CheckpointStorage) -> Self {
        Self::new(storage.build_store())
    }

    /// A manager that remembers nothing.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullStore))
    }

    /// Save (replace) the checkpoint of type `C` for `key`.
    pub async fn save<C: Checkpoint>(&self, key: &str, checkpoint: &C) -> anyhow::Result<()> {
        let id = CheckpointID::of::<C>(key);
        let checkpoint_data = serde_json::to_string(checkpoint)?;
        self.store
            .store_checkpoint(&id, checkpoint_data)
            .await
            .with_context(|| format!("Failed to save {} checkpoint '{key}'", C::KIND))?;

        tracing::debug!(
            "Saved {} checkpoint '{}': {}",
            C::KIND,
            key,
            checkpoint.to_cli_string()
        );
        Ok(())
    }

    /// Load the checkpoint of type `C` for `key`, if one was saved.
    pub async fn load<C: Checkpoint>(&self, key: &str) -> anyhow::Result<Option<C>> {
        let id = CheckpointID::of::<C>(key);
        match self.store.read_checkpoint(&id).await? {
            Some(stored) => {
                let file = CheckpointFile::from_stored(stored)?;
                Ok(Some(file.parse::<C>().with_context(|| {
                    format!("Failed to parse {} checkpoint '{key}'", C::KIND)
                })?))
            }
            None => Ok(None),
        }
    }

    /// Forget the checkpoint of type `C` for `key`.
    pub async fn remove<C: Checkpoint>(&self, key: &str) -> anyhow::Result<()> {
        self.store.remove_checkpoint(&CheckpointID::of::<C>(key)).await
    }

    /// Every saved checkpoint of type `C` with its key, ordered by key.
    pub async fn list<C: Checkpoint>(&self) -> anyhow::Result<Vec<(String, C)>> {
        let mut out = Vec::new();
        for stored in self.store.list_checkpoints(C::KIND).await? {
            let key = stored.key.clone();
            let file = CheckpointFile::from_stored(stored)?;
            out.push((key, file.parse::<C>()?));
        }
        Ok(out)
    }
}

/// Store that discards writes and never finds anything.
pub struct NullStore;

#[async_trait]
impl CheckpointStore for NullStore {
    async fn store_checkpoint(&self, _id: &CheckpointID, _data: String) -> anyhow::Result<()> {
        Ok(())
    }

    async fn read_checkpoint(&self, _id: &CheckpointID) -> anyhow::Result<Option<StoredCheckpoint>> {
        Ok(None)
    }

    async fn remove_checkpoint(&self, _id: &CheckpointID) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list_checkpoints(&self, _kind: &str) -> anyhow::Result<Vec<StoredCheckpoint>> {
        Ok(Vec::new())
    }
}
