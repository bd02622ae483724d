//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use checkpoint::{CheckpointManager, CheckpointStorage};
use legacy_sync::connection::ConnectionManager;
use legacy_sync::schema::SchemaTranslator;
use legacy_sync::testing::{
    customer, customers_schema, test_connections, test_settings, MemoryDestination, MemorySource,
};
use sync_core::TableMapping;
use tempfile::TempDir;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("legacy_sync=debug")
        .with_test_writer()
        .try_init()
        .ok();
}

/// A source, a destination and the connection manager over both.
pub struct Harness {
    pub source: MemorySource,
    pub destination: MemoryDestination,
    pub connections: Arc<ConnectionManager>,
    pub checkpoint_dir: TempDir,
}

impl Harness {
    /// `retries` immediate retries for connections and writes.
    pub fn new(retries: u32) -> Self {
        Self::with_destination(MemoryDestination::new(), retries)
    }

    pub fn with_destination(destination: MemoryDestination, retries: u32) -> Self {
        init_tracing();
        let source = MemorySource::new();
        let connections = test_connections(&source, &destination, test_settings(retries));
        Self {
            source,
            destination,
            connections,
            checkpoint_dir: TempDir::new().unwrap(),
        }
    }

    /// Filesystem checkpoints in this harness's temporary directory.
    pub fn checkpoints(&self) -> CheckpointManager {
        CheckpointManager::from_storage(&CheckpointStorage::filesystem(
            self.checkpoint_dir.path(),
        ))
    }

    /// Seed `customers` with rows `1..=count`, row `i` updated at minute `i`.
    pub fn seed_customers(&self, count: i64) {
        let rows = (1..=count)
            .map(|id| customer(id, &format!("Customer{id}"), id))
            .collect();
        self.source.add_table(customers_schema(), rows);
    }

    /// Create the destination `customers` table tracked on `updated_at`.
    pub async fn prepare_customers(&self) -> TableMapping {
        let translator = SchemaTranslator::new();
        let ddl = translator
            .translate(&customers_schema(), Some("updated_at"))
            .unwrap();
        let mut destination = self.connections.acquire_destination().await.unwrap();
        translator.apply(&mut *destination, &ddl).await.unwrap();
        ddl.mapping
    }
}
