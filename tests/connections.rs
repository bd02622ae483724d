//! Connection acquisition, pooling and release.

mod common;

use common::Harness;
use legacy_sync::full_sync::{BatchDataMigrator, RunStatus};
use legacy_sync::retry::RetryPolicy;
use legacy_sync::testing::MemoryDestination;
use sync_core::SyncError;

#[tokio::test(start_paused = true)]
async fn test_exhausted_pool_times_out() {
    let harness = Harness::with_destination(MemoryDestination::with_pool_size(1), 0);
    let held = harness.connections.acquire_destination().await.unwrap();
    assert_eq!(harness.destination.in_use(), 1);

    let err = harness.connections.acquire_destination().await.err().unwrap();
    assert!(matches!(err, SyncError::ConnectionUnavailable(_)));
    assert!(err.to_string().contains("pool size 1"));

    drop(held);
    assert!(harness.connections.acquire_destination().await.is_ok());
}

#[tokio::test]
async fn test_source_connects_are_retried() {
    let harness = Harness::new(2);
    harness.seed_customers(1);
    harness.source.fail_connects(2);

    let handle = harness.connections.acquire_source().await.unwrap();
    handle.release().await;

    assert_eq!(harness.source.connections_opened(), 1);
    assert_eq!(harness.source.open_sessions(), 0);
}

#[tokio::test]
async fn test_source_connect_gives_up_after_retries() {
    let harness = Harness::new(1);
    harness.source.fail_connects(2);

    let err = harness.connections.acquire_source().await.err().unwrap();
    assert!(matches!(err, SyncError::ConnectionUnavailable(_)));
    assert_eq!(harness.source.connections_opened(), 0);
}

#[tokio::test]
async fn test_check_connections_reports_each_side() {
    let harness = Harness::new(0);
    assert!(harness.connections.check_connections().await.is_healthy());

    harness.source.fail_connects(1);
    let report = harness.connections.check_connections().await;
    assert!(report.source.is_err());
    assert!(report.destination.is_ok());
    assert!(!report.is_healthy());
}

#[tokio::test]
async fn test_migration_returns_every_connection() {
    let harness = Harness::with_destination(MemoryDestination::with_pool_size(1), 0);
    harness.seed_customers(35);
    let mapping = harness.prepare_customers().await;

    let results = BatchDataMigrator::new(
        harness.connections.clone(),
        harness.checkpoints(),
        RetryPolicy::immediate(0),
    )
    .migrate_all(std::slice::from_ref(&mapping), 10, 4)
    .await;

    assert_eq!(results[0].1.as_ref().unwrap().status, RunStatus::Completed);
    assert_eq!(harness.destination.in_use(), 0);
    assert_eq!(harness.source.open_sessions(), 0);
    assert_eq!(harness.connections.destination_pool_size(), 1);
}

#[tokio::test]
async fn test_failed_reads_release_source_sessions() {
    let harness = Harness::new(1);
    harness.seed_customers(10);
    let mapping = harness.prepare_customers().await;
    harness.source.fail_reads(0, 2, true);

    let run = BatchDataMigrator::new(
        harness.connections.clone(),
        harness.checkpoints(),
        RetryPolicy::immediate(1),
    )
    .migrate(&mapping, 5)
    .await
    .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(harness.source.open_sessions(), 0);
}
