//! Batch migration against the in-memory source and destination.

mod common;

use common::Harness;
use legacy_sync::full_sync::{BatchDataMigrator, RunStatus};
use legacy_sync::progress::{ProgressEvent, ProgressReporter};
use legacy_sync::retry::RetryPolicy;
use legacy_sync::testing::customer;
use legacy_sync::transform::TransformRegistry;
use sync_core::{SyncError, UniversalValue};
use tokio_util::sync::CancellationToken;

fn migrator(harness: &Harness, retries: u32) -> BatchDataMigrator {
    BatchDataMigrator::new(
        harness.connections.clone(),
        harness.checkpoints(),
        RetryPolicy::immediate(retries),
    )
}

#[tokio::test]
async fn test_three_rows_migrate_in_one_batch() {
    let harness = Harness::new(0);
    harness.seed_customers(3);
    let mapping = harness.prepare_customers().await;

    let run = migrator(&harness, 0).migrate(&mapping, 10).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.rows_planned, 3);
    assert_eq!(run.rows_completed, 3);
    assert_eq!(run.batches_completed, 1);
    assert_eq!(run.source_rows, Some(3));
    assert_eq!(run.destination_rows, Some(3));
    assert_eq!(
        harness.destination.rows("customers"),
        vec![
            customer(1, "Customer1", 1),
            customer(2, "Customer2", 2),
            customer(3, "Customer3", 3),
        ]
    );
}

#[tokio::test]
async fn test_empty_table_completes_without_writes() {
    let harness = Harness::new(0);
    harness.seed_customers(0);
    let mapping = harness.prepare_customers().await;

    let run = migrator(&harness, 0).migrate(&mapping, 10).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.rows_completed, 0);
    assert_eq!(run.batches_completed, 0);
    assert_eq!(harness.destination.write_calls(), 0);
}

#[tokio::test]
async fn test_failed_batch_keeps_earlier_batches() {
    let harness = Harness::new(0);
    harness.seed_customers(50);
    let mapping = harness.prepare_customers().await;

    // Batch 1 commits, then every attempt at batch 2 fails.
    harness.destination.fail_writes(1, 3, true);
    let run = migrator(&harness, 2).migrate(&mapping, 10).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.batches_completed, 1);
    assert_eq!(run.rows_completed, 10);
    assert_eq!(run.retries, 2);
    assert_eq!(run.last_key, Some(vec![UniversalValue::Int64(10)]));
    assert!(run.error.as_deref().unwrap().contains("Batch 2"));
    assert_eq!(harness.destination.write_calls(), 4);
    assert_eq!(harness.destination.rows("customers").len(), 10);
}

#[tokio::test]
async fn test_retry_succeeds_within_budget() {
    let harness = Harness::new(0);
    harness.seed_customers(20);
    let mapping = harness.prepare_customers().await;

    harness.destination.fail_writes(1, 2, true);
    let (reporter, mut events) = ProgressReporter::with_channel();
    let run = migrator(&harness, 2)
        .with_reporter(reporter)
        .migrate(&mapping, 10)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.retries, 2);
    assert_eq!(harness.destination.rows("customers").len(), 20);

    let mut retried = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ProgressEvent::BatchRetry { batch, retry, .. } = event {
            retried.push((batch, retry));
        }
    }
    assert_eq!(retried, vec![(2, 1), (2, 2)]);
}

#[tokio::test]
async fn test_data_errors_are_not_retried() {
    let harness = Harness::new(0);
    harness.seed_customers(5);
    let mapping = harness.prepare_customers().await;

    harness.destination.fail_writes(0, 1, false);
    let run = migrator(&harness, 3).migrate(&mapping, 10).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.retries, 0);
    assert_eq!(harness.destination.write_calls(), 1);
    assert!(harness.destination.rows("customers").is_empty());
}

#[tokio::test]
async fn test_resume_continues_after_last_committed_batch() {
    let harness = Harness::new(0);
    harness.seed_customers(50);
    let mapping = harness.prepare_customers().await;

    harness.destination.fail_writes(2, 1, false);
    let failed = migrator(&harness, 0).migrate(&mapping, 10).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.batches_completed, 2);

    let writes_before = harness.destination.write_calls();
    let resumed = migrator(&harness, 0).migrate(&mapping, 10).await.unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.resumed_from, Some(failed.run_id));
    assert_eq!(resumed.rows_completed, 50);
    assert_eq!(resumed.batches_completed, 5);
    // Only batches 3, 4 and 5 are written again.
    assert_eq!(harness.destination.write_calls() - writes_before, 3);
    assert_eq!(harness.destination.rows("customers").len(), 50);
}

#[tokio::test]
async fn test_resume_after_any_failed_batch_matches_uninterrupted_run() {
    // 55 rows in batches of 10: five full batches and a short sixth.
    let uninterrupted = Harness::new(0);
    uninterrupted.seed_customers(55);
    let mapping = uninterrupted.prepare_customers().await;
    migrator(&uninterrupted, 0).migrate(&mapping, 10).await.unwrap();
    let expected = uninterrupted.destination.rows("customers");
    assert_eq!(expected.len(), 55);

    for committed in 0..=5u64 {
        let harness = Harness::new(0);
        harness.seed_customers(55);
        let mapping = harness.prepare_customers().await;

        harness.destination.fail_writes(committed, 1, false);
        let failed = migrator(&harness, 0).migrate(&mapping, 10).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed, "failure after {committed} batch(es)");
        assert_eq!(failed.batches_completed, committed);

        let writes_before = harness.destination.write_calls();
        let resumed = migrator(&harness, 0).migrate(&mapping, 10).await.unwrap();

        assert_eq!(resumed.status, RunStatus::Completed, "resume after {committed} batch(es)");
        assert_eq!(resumed.resumed_from, Some(failed.run_id));
        assert_eq!(resumed.batches_completed, 6);
        assert_eq!(harness.destination.write_calls() - writes_before, 6 - committed);
        assert_eq!(harness.destination.rows("customers"), expected);
    }
}

#[tokio::test]
async fn test_rerun_after_completion_is_idempotent() {
    let harness = Harness::new(0);
    harness.seed_customers(25);
    let mapping = harness.prepare_customers().await;

    let migrator = migrator(&harness, 0);
    migrator.migrate(&mapping, 10).await.unwrap();
    let first = harness.destination.rows("customers");

    // A completed run is not resumed; the second run starts over and
    // overwrites every row with the same values.
    let second = migrator.migrate(&mapping, 10).await.unwrap();
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.resumed_from, None);
    assert_eq!(harness.destination.rows("customers"), first);
}

#[tokio::test]
async fn test_discarded_checkpoint_restarts_from_first_batch() {
    let harness = Harness::new(0);
    harness.seed_customers(30);
    let mapping = harness.prepare_customers().await;

    harness.destination.fail_writes(1, 1, false);
    let migrator = migrator(&harness, 0);
    migrator.migrate(&mapping, 10).await.unwrap();
    assert!(migrator.last_run("customers").await.unwrap().is_some());

    migrator.discard_checkpoint("customers").await.unwrap();
    assert!(migrator.last_run("customers").await.unwrap().is_none());

    let run = migrator.migrate(&mapping, 10).await.unwrap();
    assert_eq!(run.resumed_from, None);
    assert_eq!(run.batches_completed, 3);
}

#[tokio::test]
async fn test_cancellation_stops_at_batch_boundary() {
    let harness = Harness::new(0);
    harness.seed_customers(30);
    let mapping = harness.prepare_customers().await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let run = migrator(&harness, 0)
        .with_cancellation(cancel)
        .migrate(&mapping, 10)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::PartiallyCompleted);
    assert_eq!(run.batches_completed, 0);
    assert!(harness.destination.rows("customers").is_empty());
}

#[tokio::test]
async fn test_transform_is_applied_before_write() {
    let harness = Harness::new(0);
    harness.seed_customers(2);
    let mapping = harness.prepare_customers().await;

    let mut transforms = TransformRegistry::new();
    transforms.register("customers", |mut row| {
        if let Some(UniversalValue::Text(name)) = row.get("name").cloned() {
            row.insert("name".to_string(), UniversalValue::Text(name.to_uppercase()));
        }
        row
    });
    let run = migrator(&harness, 0)
        .with_transforms(transforms)
        .migrate(&mapping, 10)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    let row = harness
        .destination
        .row("customers", &UniversalValue::Int64(1))
        .unwrap();
    assert_eq!(
        row.get("name"),
        Some(&UniversalValue::Text("CUSTOMER1".to_string()))
    );
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected() {
    let harness = Harness::new(0);
    harness.seed_customers(1);
    let mapping = harness.prepare_customers().await;

    let err = migrator(&harness, 0).migrate(&mapping, 0).await.unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[tokio::test]
async fn test_migrate_all_reports_every_table_in_order() {
    let harness = Harness::new(0);
    harness.seed_customers(12);
    let mapping = harness.prepare_customers().await;

    let mut missing = mapping.clone();
    missing.table = "orders".to_string();

    let results = migrator(&harness, 0)
        .migrate_all(&[missing, mapping], 5, 2)
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "orders");
    assert_eq!(results[0].1.as_ref().unwrap().status, RunStatus::Failed);
    assert_eq!(results[1].0, "customers");
    assert_eq!(results[1].1.as_ref().unwrap().status, RunStatus::Completed);
    assert_eq!(harness.destination.rows("customers").len(), 12);
}
