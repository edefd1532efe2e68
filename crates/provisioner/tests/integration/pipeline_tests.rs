//! End-to-end signup pipeline tests.
//!
//! publish -> log -> consumer -> issue -> store -> commit, against an
//! in-memory log and a mock user store.
//!
//! ## Test Naming
//!
//! Tests follow the convention: `test_<feature>_<scenario>_<expected_result>`

use chrono::{Duration, Utc};
use provisioner::observability::ConsumerState;
use provisioner_test_utils::*;

// ============================================================================
// Happy path
// ============================================================================

/// A signup for an existing user ends with a stored, verifiable credential
/// and the group positioned just past the record.
#[tokio::test]
async fn test_signup_for_existing_user_stores_credential() -> Result<(), anyhow::Error> {
    // Arrange
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    let user_id = harness.users.insert_user(TEST_IDENTITY_ALICE)?;

    // Act
    let before = Utc::now();
    let position = harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    assert!(harness.wait_for_commits(1).await, "record was not committed");
    let after = Utc::now();

    // Assert
    let user = harness.users.user(user_id).expect("user exists");
    let token = user.jwt_token.clone().expect("credential stored");
    token
        .assert_session_token(TEST_SECRET)
        .assert_for_user(user_id);

    let expires_at = user.jwt_token_expires_at.expect("expiry stored");
    let lifetime = Duration::seconds(TEST_TOKEN_LIFETIME_SECS as i64);
    assert!(expires_at >= before + lifetime - Duration::seconds(1));
    assert!(expires_at <= after + lifetime);
    token.assert_expires_at(expires_at);

    assert_eq!(
        harness.committed(position.partition).await,
        Some(position.offset + 1)
    );
    assert_eq!(harness.health.snapshot().processed, 1);

    harness.stop().await?;
    Ok(())
}

/// A signup for an identity with no user is discarded but still committed.
#[tokio::test]
async fn test_signup_for_unknown_identity_is_committed_without_credential(
) -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;

    let position = harness.publisher.publish(TEST_IDENTITY_GHOST).await?;
    assert!(harness.wait_for_commits(1).await);

    assert_eq!(
        harness.committed(position.partition).await,
        Some(position.offset + 1)
    );
    assert_eq!(harness.users.save_attempts(), 0);

    let snapshot = harness.health.snapshot();
    assert_eq!(snapshot.discarded, 1);
    assert_eq!(snapshot.processed, 0);

    harness.stop().await?;
    Ok(())
}

/// Records on one partition are committed in order and none are skipped.
#[tokio::test]
async fn test_consecutive_signups_commit_every_offset() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    let alice = harness.users.insert_user(TEST_IDENTITY_ALICE)?;
    let bob = harness.users.insert_user(TEST_IDENTITY_BOB)?;

    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    harness.publisher.publish(TEST_IDENTITY_GHOST).await?;
    harness.publisher.publish(TEST_IDENTITY_BOB).await?;
    assert!(harness.wait_for_commits(3).await);

    assert_eq!(harness.committed(0).await, Some(3));
    assert!(harness.users.user(alice).and_then(|u| u.jwt_token).is_some());
    assert!(harness.users.user(bob).and_then(|u| u.jwt_token).is_some());
    assert_eq!(harness.users.save_count(), 2);

    harness.stop().await?;
    Ok(())
}

/// Every partition is read by the single group member.
#[tokio::test]
async fn test_signups_across_partitions_are_all_committed() -> Result<(), anyhow::Error> {
    let options = HarnessOptions {
        partitions: 3,
        ..HarnessOptions::default()
    };
    let mut harness = PipelineHarness::start(options).await?;
    harness.users.insert_user(TEST_IDENTITY_ALICE)?;

    let mut partitions_used = std::collections::BTreeSet::new();
    for _ in 0..6 {
        let position = harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
        partitions_used.insert(position.partition);
    }
    assert!(harness.wait_for_commits(6).await);

    assert_eq!(partitions_used.len(), 3, "balancer spread records");
    let mut total = 0;
    for partition in 0..3 {
        total += harness.committed(partition).await.unwrap_or(0);
    }
    assert_eq!(total, 6);

    harness.stop().await?;
    Ok(())
}

// ============================================================================
// Idempotence and restart
// ============================================================================

/// Re-delivering the same signup re-issues a credential; the latest one wins
/// and is still valid.
#[tokio::test]
async fn test_repeated_signup_reissues_valid_credential() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
    let user_id = harness.users.insert_user(TEST_IDENTITY_ALICE)?;

    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    assert!(harness.wait_for_commits(2).await);

    assert_eq!(harness.users.save_count(), 2);
    let token = harness
        .users
        .user(user_id)
        .and_then(|u| u.jwt_token)
        .expect("credential stored");
    token
        .assert_session_token(TEST_SECRET)
        .assert_for_user(user_id);

    harness.stop().await?;
    Ok(())
}

/// A new consumer in the same group resumes from the committed position and
/// does not reprocess committed records.
#[tokio::test]
async fn test_restarted_consumer_resumes_from_committed_position() -> Result<(), anyhow::Error> {
    let mut first = PipelineHarness::start(HarnessOptions::default()).await?;
    first.users.insert_user(TEST_IDENTITY_ALICE)?;
    let bob = first.users.insert_user(TEST_IDENTITY_BOB)?;

    first.publisher.publish(TEST_IDENTITY_ALICE).await?;
    assert!(first.wait_for_commits(1).await);
    first.stop().await?;

    let mut second = PipelineHarness::start_with(
        first.log.clone(),
        first.users.clone(),
        HarnessOptions::default(),
    )
    .await?;
    second.publisher.publish(TEST_IDENTITY_BOB).await?;
    assert!(second.wait_for_commits(1).await);

    assert_eq!(second.committed(0).await, Some(2));
    assert_eq!(second.users.save_count(), 2, "alice was not reprocessed");
    assert!(second.users.user(bob).and_then(|u| u.jwt_token).is_some());

    second.stop().await?;
    Ok(())
}

// ============================================================================
// Shutdown
// ============================================================================

/// Cancelling an idle consumer returns promptly and leaves it stopped.
#[tokio::test]
async fn test_idle_consumer_stops_on_cancellation() -> Result<(), anyhow::Error> {
    let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;

    tokio::time::timeout(std::time::Duration::from_secs(2), harness.stop()).await??;

    assert_eq!(harness.health.state(), ConsumerState::Stopped);
    assert!(!harness.health.is_ready());
    Ok(())
}

/// Records published before the consumer starts are processed once it joins.
#[tokio::test]
async fn test_backlog_is_processed_after_join() -> Result<(), anyhow::Error> {
    let mut first = PipelineHarness::start(HarnessOptions::default()).await?;
    first.stop().await?;
    let user_id = first.users.insert_user(TEST_IDENTITY_ALICE)?;
    first.publisher.publish(TEST_IDENTITY_ALICE).await?;
    first.publisher.publish(TEST_IDENTITY_GHOST).await?;

    let mut second = PipelineHarness::start_with(
        first.log.clone(),
        first.users.clone(),
        HarnessOptions::default(),
    )
    .await?;
    assert!(second.wait_for_commits(2).await);

    assert_eq!(second.committed(0).await, Some(2));
    assert!(second.users.user(user_id).and_then(|u| u.jwt_token).is_some());

    second.stop().await?;
    Ok(())
}
