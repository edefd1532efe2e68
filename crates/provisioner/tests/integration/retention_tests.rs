//! Retention safety tests.
//!
//! The trimmer never discards records a group has not committed past; a raw
//! delete that does is observable to readers as an out-of-range position,
//! never as an empty read.

use provisioner::config::CommitPolicy;
use provisioner::errors::PipelineError;
use provisioner::log::{EventLog, FetchSettings, GroupReader, LocalLog, LogError};
use provisioner::repositories::users::mock::MockUserStore;
use provisioner::services::{RetentionTrimmer, SignupPublisher};
use provisioner_test_utils::*;
use std::sync::Arc;
use std::time::Duration;

fn fetch_settings() -> FetchSettings {
    FetchSettings {
        min_bytes: 1,
        max_bytes: 1_000_000,
        max_wait: Duration::from_millis(20),
    }
}

async fn log_with_signups(identities: &[&str]) -> Result<Arc<dyn EventLog>, anyhow::Error> {
    let log: Arc<dyn EventLog> = Arc::new(LocalLog::in_memory(TEST_TOPIC, 1)?);
    let publisher = SignupPublisher::new(Arc::clone(&log), TEST_TOPIC);
    for identity in identities {
        publisher.publish(identity).await?;
    }
    Ok(log)
}

async fn wait_for_earliest(log: &dyn EventLog, expected: i64) -> i64 {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let earliest = log
            .earliest_offset(TEST_TOPIC, 0)
            .await
            .expect("earliest offset readable");
        if earliest >= expected || tokio::time::Instant::now() >= deadline {
            return earliest;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Trimming past a group's committed position is refused and leaves the log
/// untouched.
#[tokio::test]
async fn test_trim_ahead_of_commit_is_rejected() -> Result<(), anyhow::Error> {
    let log = log_with_signups(&[TEST_IDENTITY_ALICE; 5]).await?;
    log.commit(TEST_GROUP_ID, TEST_TOPIC, 0, 2).await?;
    let trimmer = RetentionTrimmer::new(Arc::clone(&log), TEST_TOPIC);

    let result = trimmer.trim_before(0, 4).await;

    match result {
        Err(PipelineError::TrimAheadOfCommit {
            partition,
            requested,
            group,
            committed,
        }) => {
            assert_eq!(partition, 0);
            assert_eq!(requested, 4);
            assert_eq!(group, TEST_GROUP_ID);
            assert_eq!(committed, 2);
        }
        other => panic!("expected TrimAheadOfCommit, got {other:?}"),
    }
    assert_eq!(log.earliest_offset(TEST_TOPIC, 0).await?, 0);
    Ok(())
}

/// The slowest group bounds how far a trim may go.
#[tokio::test]
async fn test_trim_to_committed_stops_at_slowest_group() -> Result<(), anyhow::Error> {
    let log = log_with_signups(&[TEST_IDENTITY_ALICE; 5]).await?;
    log.commit(TEST_GROUP_ID, TEST_TOPIC, 0, 4).await?;
    log.commit(TEST_OTHER_GROUP_ID, TEST_TOPIC, 0, 1).await?;
    let trimmer = RetentionTrimmer::new(Arc::clone(&log), TEST_TOPIC);

    let report = trimmer.trim_to_committed(0).await?.expect("groups committed");

    assert_eq!(report.earliest_after, 1);
    assert_eq!(log.earliest_offset(TEST_TOPIC, 0).await?, 1);
    Ok(())
}

/// A raw delete past a fresh group's position surfaces as
/// `OffsetOutOfRange` on its first read, distinct from "no data".
#[tokio::test]
async fn test_fresh_group_after_raw_delete_sees_out_of_range() -> Result<(), anyhow::Error> {
    let log = log_with_signups(&[TEST_IDENTITY_ALICE; 4]).await?;
    log.delete_records(TEST_TOPIC, 0, 3).await?;

    let mut reader =
        GroupReader::join(Arc::clone(&log), TEST_TOPIC, TEST_GROUP_ID, fetch_settings()).await?;
    let result = reader.next_record().await;

    match result {
        Err(LogError::OffsetOutOfRange {
            partition,
            requested,
            earliest,
            latest,
            ..
        }) => {
            assert_eq!(partition, 0);
            assert_eq!(requested, 0);
            assert_eq!(earliest, 3);
            assert_eq!(latest, 4);
        }
        other => panic!("expected OffsetOutOfRange, got {other:?}"),
    }

    // After resetting, the retained record is readable
    assert_eq!(reader.reset_to_earliest(0).await?, 3);
    let record = reader.next_record().await?.expect("retained record");
    assert_eq!(record.offset, 3);
    Ok(())
}

/// A caught-up group reads nothing, without an error.
#[tokio::test]
async fn test_caught_up_group_sees_empty_read() -> Result<(), anyhow::Error> {
    let log = log_with_signups(&[TEST_IDENTITY_ALICE; 2]).await?;
    log.commit(TEST_GROUP_ID, TEST_TOPIC, 0, 2).await?;

    let mut reader =
        GroupReader::join(Arc::clone(&log), TEST_TOPIC, TEST_GROUP_ID, fetch_settings()).await?;

    assert!(reader.next_record().await?.is_none());
    Ok(())
}

/// The consumer recovers from a lost read position by skipping to the
/// earliest retained record.
#[tokio::test]
async fn test_consumer_skips_to_earliest_after_records_lost() -> Result<(), anyhow::Error> {
    let local = LocalLog::in_memory(TEST_TOPIC, 1)?;
    let log = Arc::new(FaultyLog::new(Arc::new(local)));
    let users = MockUserStore::new();
    let alice = users.insert_user(TEST_IDENTITY_ALICE)?;

    let publisher = SignupPublisher::new(log.inner(), TEST_TOPIC);
    publisher.publish(TEST_IDENTITY_GHOST).await?;
    publisher.publish(TEST_IDENTITY_GHOST).await?;
    publisher.publish(TEST_IDENTITY_ALICE).await?;
    log.delete_records(TEST_TOPIC, 0, 2).await?;

    let mut harness = PipelineHarness::start_with(log, users, HarnessOptions::default()).await?;
    assert!(harness.wait_for_commits(1).await);

    assert_eq!(harness.committed(0).await, Some(3));
    assert_eq!(harness.health.snapshot().discarded, 0);
    assert!(harness.users.user(alice).and_then(|u| u.jwt_token).is_some());

    harness.stop().await?;
    Ok(())
}

/// Under commit-and-trim the watermark follows the group's commits.
#[tokio::test]
async fn test_commit_and_trim_advances_watermark() -> Result<(), anyhow::Error> {
    let options = HarnessOptions {
        commit_policy: CommitPolicy::CommitAndTrim,
        ..HarnessOptions::default()
    };
    let mut harness = PipelineHarness::start(options).await?;
    harness.users.insert_user(TEST_IDENTITY_ALICE)?;

    for _ in 0..3 {
        harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
    }
    assert!(harness.wait_for_commits(3).await);

    assert_eq!(wait_for_earliest(harness.log.as_ref(), 3).await, 3);
    assert_eq!(harness.committed(0).await, Some(3));

    harness.stop().await?;
    Ok(())
}

/// Under commit-and-trim a lagging group holds the watermark back.
#[tokio::test]
async fn test_commit_and_trim_respects_other_groups() -> Result<(), anyhow::Error> {
    let local = LocalLog::in_memory(TEST_TOPIC, 1)?;
    let log = Arc::new(FaultyLog::new(Arc::new(local)));
    let users = MockUserStore::new();
    users.insert_user(TEST_IDENTITY_ALICE)?;

    let publisher = SignupPublisher::new(log.inner(), TEST_TOPIC);
    for _ in 0..3 {
        publisher.publish(TEST_IDENTITY_ALICE).await?;
    }
    log.commit(TEST_OTHER_GROUP_ID, TEST_TOPIC, 0, 1).await?;

    let options = HarnessOptions {
        commit_policy: CommitPolicy::CommitAndTrim,
        ..HarnessOptions::default()
    };
    let mut harness = PipelineHarness::start_with(log, users, options).await?;
    assert!(harness.wait_for_commits(3).await);
    harness.stop().await?;

    assert_eq!(harness.committed(0).await, Some(3));
    assert_eq!(harness.log.earliest_offset(TEST_TOPIC, 0).await?, 1);
    Ok(())
}
