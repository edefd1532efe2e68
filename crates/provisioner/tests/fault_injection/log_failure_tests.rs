//! Log failure tests: flapping fetches and commits, and a closed client.

use provisioner::errors::PipelineError;
use provisioner::log::EventLog;
use provisioner_test_utils::*;

/// Test a failed commit rewinds and redelivers the record.
#[tokio::test]
async fn test_failed_commit_redelivers_record() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    harness.users.insert_user(TEST_IDENTITY_ALICE)?;
    harness.log.fail_next_commits(2);

    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    assert!(harness.wait_for_commits(1).await);

    assert_eq!(harness.log.commit_calls(), 3);
    // Each redelivery re-issues; the credential write is idempotent
    assert_eq!(harness.users.save_count(), 3);
    assert_eq!(harness.committed(0).await, Some(1));

    harness.stop().await?;
    Ok(())
}

/// Test a failed commit is retried before any later offset is committed.
#[tokio::test]
async fn test_failed_commit_keeps_partition_order() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    harness.users.insert_user(TEST_IDENTITY_ALICE)?;
    harness.users.insert_user(TEST_IDENTITY_BOB)?;
    harness.log.fail_next_commits(1);

    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    harness.publisher.publish(TEST_IDENTITY_BOB).await?;
    assert!(harness.wait_for_commits(2).await);

    assert_eq!(harness.log.commit_calls(), 3);
    assert_eq!(harness.log.committed_sequence(), vec![(0, 1), (0, 2)]);
    assert_eq!(harness.committed(0).await, Some(2));

    harness.stop().await?;
    Ok(())
}

/// Test fetch failures are retried and do not lose records.
#[tokio::test]
async fn test_failed_fetches_are_retried() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    harness.users.insert_user(TEST_IDENTITY_ALICE)?;
    harness.log.fail_next_fetches(3);
    assert!(harness.wait_for_failures(3).await);

    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    assert!(harness.wait_for_commits(1).await);

    assert_eq!(harness.committed(0).await, Some(1));
    assert_eq!(harness.health.consecutive_failures(), 0);

    harness.stop().await?;
    Ok(())
}

/// Test readiness is lost at the failure threshold and regained on recovery.
#[tokio::test]
async fn test_readiness_follows_consecutive_failures() -> Result<(), anyhow::Error> {
    let options = HarnessOptions {
        unhealthy_after: 2,
        ..HarnessOptions::default()
    };
    let mut harness = PipelineHarness::start(options).await?;
    harness.users.insert_user(TEST_IDENTITY_ALICE)?;
    harness.log.fail_next_fetches(u32::MAX);

    assert!(harness.wait_for_failures(2).await);
    assert!(!harness.health.is_ready());

    harness.log.fail_next_fetches(0);
    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    assert!(harness.wait_for_commits(1).await);
    assert!(harness.health.is_ready());

    harness.stop().await?;
    Ok(())
}

/// Test a closed log client stops the worker with a fatal error.
#[tokio::test]
async fn test_closed_log_stops_consumer() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;

    harness.log.close().await?;
    let result = harness.join().await;

    assert!(matches!(result, Err(PipelineError::Fatal(_))));
    assert!(!harness.health.is_ready());
    Ok(())
}

/// Test a publish failure is reported to the caller and not retried.
#[tokio::test]
async fn test_publish_failure_is_surfaced() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    harness.log.fail_next_appends(1);

    let result = harness.publisher.publish(TEST_IDENTITY_ALICE).await;
    assert!(matches!(result, Err(PipelineError::TransientIo(_))));

    // Best-effort publishing swallows the failure
    harness.log.fail_next_appends(1);
    assert!(harness
        .publisher
        .publish_best_effort(TEST_IDENTITY_ALICE)
        .await
        .is_none());

    assert_eq!(harness.log.latest_offset(TEST_TOPIC, 0).await?, 0);
    harness.stop().await?;
    Ok(())
}
