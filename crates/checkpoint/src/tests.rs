//! Unit tests for the checkpoint crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::{
    Checkpoint, CheckpointFile, CheckpointID, CheckpointManager, CheckpointStorage,
    CheckpointStore, FilesystemStore,
};

/// Test checkpoint type for unit tests.
///
/// This is a simple checkpoint type that exercises the trait implementation
/// without needing actual database connections.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct TestCheckpoint {
    value: i64,
    timestamp: DateTime<Utc>,
}

impl Checkpoint for TestCheckpoint {
    const KIND: &'static str = "test";

    fn to_cli_string(&self) -> String {
        format!("{}:{}", self.value, self.timestamp.to_rfc3339())
    }

    fn from_cli_string(s: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = s.splitn(2, ':').collect();
        if parts.len() != 2 {
            anyhow::bail!("Invalid test checkpoint format: expected 'value:timestamp'");
        }
        Ok(Self {
            value: parts[0].parse()?,
            timestamp: DateTime::parse_from_rfc3339(parts[1])?.with_timezone(&Utc),
        })
    }
}

/// A kind that keeps the default `from_cli_string`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct OtherCheckpoint {
    done: bool,
}

impl Checkpoint for OtherCheckpoint {
    const KIND: &'static str = "other";

    fn to_cli_string(&self) -> String {
        self.done.to_string()
    }
}

// ============================================================================
// CheckpointFile Tests
// ============================================================================

#[test]
fn test_checkpoint_file_roundtrip() {
    let original = TestCheckpoint {
        value: 12345,
        timestamp: Utc::now(),
    };

    let file = CheckpointFile::new("orders", &original).unwrap();
    assert_eq!(file.kind(), "test");
    assert_eq!(file.key, "orders");

    let json = serde_json::to_string_pretty(&file).unwrap();
    let loaded: CheckpointFile = serde_json::from_str(&json).unwrap();
    let parsed: TestCheckpoint = loaded.parse().unwrap();

    assert_eq!(original.value, parsed.value);
    assert_eq!(original.timestamp.timestamp(), parsed.timestamp.timestamp());
}

#[test]
fn test_checkpoint_type_mismatch() {
    let cp = TestCheckpoint {
        value: 42,
        timestamp: Utc::now(),
    };
    let mut file = CheckpointFile::new("orders", &cp).unwrap();
    file.kind = "wrong".to_string();

    let result: anyhow::Result<TestCheckpoint> = file.parse();
    let err_msg = result.unwrap_err().to_string();
    assert!(err_msg.contains("type mismatch"));
    assert!(err_msg.contains("expected 'test'"));
    assert!(err_msg.contains("found 'wrong'"));
}

#[test]
fn test_cli_string_roundtrip_and_default_rejection() {
    let cp = TestCheckpoint {
        value: 7,
        timestamp: Utc::now(),
    };
    let parsed = TestCheckpoint::from_cli_string(&cp.to_cli_string()).unwrap();
    assert_eq!(parsed.value, 7);

    let err = OtherCheckpoint::from_cli_string("true").unwrap_err();
    assert!(err.to_string().contains("no command-line form"));
}

// ============================================================================
// CheckpointID Tests
// ============================================================================

#[test]
fn test_file_stem_is_sanitized() {
    let id = CheckpointID::new("restore", "3f2a/../x pre-data");
    assert_eq!(id.file_stem(), "checkpoint_restore_3f2a_.._x_pre-data");
    assert!(!id.file_stem().contains('/'));
}

// ============================================================================
// FilesystemStore Tests
// ============================================================================

#[tokio::test]
async fn test_filesystem_store_replaces_in_place() {
    let dir = TempDir::new().unwrap();
    let store = FilesystemStore::new(dir.path());
    let id = CheckpointID::new("test", "orders");

    store.store_checkpoint(&id, "{\"n\":1}".into()).await.unwrap();
    store.store_checkpoint(&id, "{\"n\":2}".into()).await.unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1, "one file per checkpoint id");

    let stored = store.read_checkpoint(&id).await.unwrap().unwrap();
    assert_eq!(stored.checkpoint_data, "{\"n\":2}");
    assert_eq!(stored.key, "orders");
}

#[tokio::test]
async fn test_filesystem_store_missing_dir_reads_none() {
    let dir = TempDir::new().unwrap();
    let store = FilesystemStore::new(dir.path().join("not-yet-created"));
    let id = CheckpointID::new("test", "orders");

    assert!(store.read_checkpoint(&id).await.unwrap().is_none());
    assert!(store.list_checkpoints("test").await.unwrap().is_empty());
    store.remove_checkpoint(&id).await.unwrap();
}

#[tokio::test]
async fn test_filesystem_store_rejects_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let store = FilesystemStore::new(dir.path());
    let id = CheckpointID::new("test", "orders");
    std::fs::write(
        dir.path().join(format!("{}.json", id.file_stem())),
        "not json",
    )
    .unwrap();

    let err = store.read_checkpoint(&id).await.unwrap_err();
    assert!(err.to_string().contains("Corrupt checkpoint file"));
}

// ============================================================================
// CheckpointManager Tests
// ============================================================================

#[tokio::test]
async fn test_manager_save_load_remove() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::from_storage(&CheckpointStorage::filesystem(dir.path()));

    let cp = TestCheckpoint {
        value: 99,
        timestamp: Utc::now(),
    };
    manager.save("orders", &cp).await.unwrap();

    let loaded: Option<TestCheckpoint> = manager.load("orders").await.unwrap();
    assert_eq!(loaded.map(|c| c.value), Some(99));

    let other: Option<TestCheckpoint> = manager.load("customers").await.unwrap();
    assert!(other.is_none());

    manager.remove::<TestCheckpoint>("orders").await.unwrap();
    let gone: Option<TestCheckpoint> = manager.load("orders").await.unwrap();
    assert!(gone.is_none());
}

#[tokio::test]
async fn test_manager_keeps_kinds_apart() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::from_storage(&CheckpointStorage::filesystem(dir.path()));

    manager
        .save(
            "orders",
            &TestCheckpoint {
                value: 1,
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap();
    manager
        .save("orders", &OtherCheckpoint { done: true })
        .await
        .unwrap();
    manager
        .save("accounts", &OtherCheckpoint { done: false })
        .await
        .unwrap();

    let others: Vec<(String, OtherCheckpoint)> = manager.list().await.unwrap();
    assert_eq!(
        others,
        vec![
            ("accounts".to_string(), OtherCheckpoint { done: false }),
            ("orders".to_string(), OtherCheckpoint { done: true }),
        ]
    );
    let tests: Vec<(String, TestCheckpoint)> = manager.list().await.unwrap();
    assert_eq!(tests.len(), 1);
}

#[tokio::test]
async fn test_disabled_manager_forgets() {
    let manager = CheckpointManager::disabled();
    manager
        .save("orders", &OtherCheckpoint { done: true })
        .await
        .unwrap();
    let loaded: Option<OtherCheckpoint> = manager.load("orders").await.unwrap();
    assert!(loaded.is_none());
}
