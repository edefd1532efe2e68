//! Durability across process restarts with a journaled log.

use provisioner::log::{EventLog, LocalLog, LocalLogConfig};
use provisioner::repositories::users::mock::MockUserStore;
use provisioner_test_utils::*;
use std::sync::Arc;

fn open_log(dir: &std::path::Path) -> Result<Arc<FaultyLog>, anyhow::Error> {
    let local = LocalLog::open(LocalLogConfig::new(TEST_TOPIC).with_data_dir(dir))?;
    Ok(Arc::new(FaultyLog::new(Arc::new(local))))
}

/// Records and commits survive a restart; the new consumer picks up exactly
/// where the old one committed.
#[tokio::test]
async fn test_consumer_resumes_after_log_reopen() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let users = MockUserStore::new();
    users.insert_user(TEST_IDENTITY_ALICE)?;
    let bob = users.insert_user(TEST_IDENTITY_BOB)?;

    // First process: one record processed, one left for later
    {
        let log = open_log(dir.path())?;
        let mut harness =
            PipelineHarness::start_with(log, users.clone(), HarnessOptions::default()).await?;
        harness.publisher.publish(TEST_IDENTITY_ALICE).await?;
        assert!(harness.wait_for_commits(1).await);
        harness.stop().await?;
        harness.publisher.publish(TEST_IDENTITY_BOB).await?;
        harness.log.close().await?;
    }

    // Second process
    let log = open_log(dir.path())?;
    assert_eq!(log.latest_offset(TEST_TOPIC, 0).await?, 2);
    assert_eq!(log.committed(TEST_GROUP_ID, TEST_TOPIC, 0).await?, Some(1));

    let mut harness = PipelineHarness::start_with(log, users, HarnessOptions::default()).await?;
    assert!(harness.wait_for_commits(1).await);

    assert_eq!(harness.committed(0).await, Some(2));
    assert_eq!(harness.users.save_count(), 2);
    assert!(harness.users.user(bob).and_then(|u| u.jwt_token).is_some());

    harness.stop().await?;
    Ok(())
}

/// A trimmed watermark is still in force after a restart.
#[tokio::test]
async fn test_trim_survives_log_reopen() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;

    {
        let log = open_log(dir.path())?;
        for _ in 0..4 {
            log.append(TEST_TOPIC, b"k", b"v").await?;
        }
        log.commit(TEST_GROUP_ID, TEST_TOPIC, 0, 3).await?;
        log.delete_records(TEST_TOPIC, 0, 3).await?;
        log.close().await?;
    }

    let log = open_log(dir.path())?;
    assert_eq!(log.earliest_offset(TEST_TOPIC, 0).await?, 3);
    assert_eq!(log.latest_offset(TEST_TOPIC, 0).await?, 4);
    assert_eq!(log.committed(TEST_GROUP_ID, TEST_TOPIC, 0).await?, Some(3));
    Ok(())
}
