//! User store failure tests.
//!
//! A failed lookup or credential write must never be committed past: the
//! record is redelivered and committed exactly once, after it succeeds.

use provisioner_test_utils::*;

/// Test a failed credential write is retried and committed once.
#[tokio::test]
async fn test_failed_save_is_retried_before_commit() -> Result<(), anyhow::Error> {
    // Arrange
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    let user_id = harness.users.insert_user(TEST_IDENTITY_ALICE)?;
    harness.users.fail_next_saves(1);

    // Act
    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    assert!(harness.wait_for_commits(1).await);

    // Assert
    assert_eq!(harness.users.save_attempts(), 2);
    assert_eq!(harness.users.save_count(), 1);
    assert_eq!(harness.log.commit_calls(), 1, "committed only after success");
    assert_eq!(harness.committed(0).await, Some(1));
    assert!(harness.users.user(user_id).and_then(|u| u.jwt_token).is_some());

    let snapshot = harness.health.snapshot();
    assert_eq!(snapshot.total_failures, 1);
    assert_eq!(snapshot.consecutive_failures, 0);

    harness.stop().await?;
    Ok(())
}

/// Test a failed lookup is retried rather than treated as "no such user".
#[tokio::test]
async fn test_failed_lookup_is_not_a_discard() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    harness.users.insert_user(TEST_IDENTITY_ALICE)?;
    harness.users.fail_next_lookups(2);

    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    assert!(harness.wait_for_commits(1).await);

    let snapshot = harness.health.snapshot();
    assert_eq!(snapshot.discarded, 0);
    assert_eq!(snapshot.processed, 1);
    assert_eq!(snapshot.total_failures, 2);
    assert_eq!(harness.log.commit_calls(), 1);

    harness.stop().await?;
    Ok(())
}

/// Test a failing record holds back later records of its partition.
#[tokio::test]
async fn test_failed_record_blocks_later_offsets() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    harness.users.insert_user(TEST_IDENTITY_ALICE)?;
    harness.users.insert_user(TEST_IDENTITY_BOB)?;
    harness.users.fail_next_saves(3);

    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    harness.publisher.publish(TEST_IDENTITY_BOB).await?;
    assert!(harness.wait_for_failures(3).await);
    assert!(harness.wait_for_commits(2).await);

    assert_eq!(harness.users.save_attempts(), 5);
    assert_eq!(harness.log.commit_calls(), 2);
    assert_eq!(harness.committed(0).await, Some(2));
    // Bob's offset is never committed ahead of Alice's
    assert_eq!(harness.log.committed_sequence(), vec![(0, 1), (0, 2)]);

    harness.stop().await?;
    Ok(())
}

/// Test cancellation during backoff stops without committing.
#[tokio::test]
async fn test_cancel_during_backoff_leaves_record_uncommitted() -> Result<(), anyhow::Error> {
    let options = HarnessOptions {
        retry_initial_backoff: std::time::Duration::from_secs(30),
        retry_max_backoff: std::time::Duration::from_secs(30),
        ..HarnessOptions::default()
    };
    let mut harness = PipelineHarness::start(options).await?;
    harness.users.insert_user(TEST_IDENTITY_ALICE)?;
    harness.users.fail_next_saves(1);

    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    assert!(harness.wait_for_failures(1).await);
    tokio::time::timeout(std::time::Duration::from_secs(2), harness.stop()).await??;

    assert_eq!(harness.committed(0).await, None);
    assert_eq!(harness.log.commit_calls(), 0);
    Ok(())
}
