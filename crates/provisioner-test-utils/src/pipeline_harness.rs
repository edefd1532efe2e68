//! Pipeline harness for end-to-end consumer tests.
//!
//! Wires a real [`SignupConsumer`] to an in-memory log (behind a
//! [`FaultyLog`]) and a [`MockUserStore`], and runs it on a background task.

use crate::fault_log::FaultyLog;
use crate::test_ids::{
    signing_secret, TEST_GROUP_ID, TEST_SECRET, TEST_TOKEN_LIFETIME_SECS, TEST_TOPIC,
};
use provisioner::config::CommitPolicy;
use provisioner::credentials::CredentialIssuer;
use provisioner::errors::PipelineError;
use provisioner::log::{EventLog, FetchSettings, LocalLog};
use provisioner::observability::ConsumerHealth;
use provisioner::repositories::users::mock::MockUserStore;
use provisioner::services::{ConsumerSettings, SignupConsumer, SignupPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub partitions: i32,
    pub commit_policy: CommitPolicy,
    pub secret: String,
    pub token_lifetime: Duration,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub fetch_max_wait: Duration,
    pub unhealthy_after: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            partitions: 1,
            commit_policy: CommitPolicy::Commit,
            secret: TEST_SECRET.to_string(),
            token_lifetime: Duration::from_secs(TEST_TOKEN_LIFETIME_SECS),
            retry_initial_backoff: Duration::from_millis(10),
            retry_max_backoff: Duration::from_millis(40),
            fetch_max_wait: Duration::from_millis(20),
            unhealthy_after: 5,
        }
    }
}

impl HarnessOptions {
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            topic: TEST_TOPIC.to_string(),
            group_id: TEST_GROUP_ID.to_string(),
            fetch: FetchSettings {
                min_bytes: 1,
                max_bytes: 1_000_000,
                max_wait: self.fetch_max_wait,
            },
            commit_policy: self.commit_policy,
            retry_initial_backoff: self.retry_initial_backoff,
            retry_max_backoff: self.retry_max_backoff,
        }
    }
}

/// A running consumer plus handles on everything around it.
///
/// # Example
/// ```rust,ignore
/// let mut harness = PipelineHarness::start(HarnessOptions::default()).await?;
/// harness.users.insert_user("a@x.com")?;
/// harness.publisher.publish("a@x.com").await?;
/// assert!(harness.wait_for_commits(1).await);
/// harness.stop().await?;
/// ```
pub struct PipelineHarness {
    pub log: Arc<FaultyLog>,
    pub users: MockUserStore,
    pub health: Arc<ConsumerHealth>,
    pub publisher: SignupPublisher,
    pub options: HarnessOptions,
    cancel: CancellationToken,
    worker: Option<JoinHandle<Result<(), PipelineError>>>,
}

impl PipelineHarness {
    /// Fresh in-memory log and empty user store.
    pub async fn start(options: HarnessOptions) -> Result<Self, PipelineError> {
        let local = LocalLog::in_memory(TEST_TOPIC, options.partitions)?;
        let log = Arc::new(FaultyLog::new(Arc::new(local)));
        Self::start_with(log, MockUserStore::new(), options).await
    }

    /// Run a new consumer against existing state, e.g. after [`Self::stop`].
    pub async fn start_with(
        log: Arc<FaultyLog>,
        users: MockUserStore,
        options: HarnessOptions,
    ) -> Result<Self, PipelineError> {
        let event_log: Arc<dyn EventLog> = log.clone();
        let health = Arc::new(ConsumerHealth::new(options.unhealthy_after));
        let issuer = CredentialIssuer::new(signing_secret(&options.secret), options.token_lifetime);

        let consumer = SignupConsumer::join(
            Arc::clone(&event_log),
            Arc::new(users.clone()),
            issuer,
            options.consumer_settings(),
            Arc::clone(&health),
        )
        .await?;

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(consumer.run(cancel.clone()));

        Ok(Self {
            log,
            users,
            health,
            publisher: SignupPublisher::new(event_log, TEST_TOPIC),
            options,
            cancel,
            worker: Some(worker),
        })
    }

    /// Committed position of the harness group on `partition`.
    pub async fn committed(&self, partition: i32) -> Option<i64> {
        self.log
            .committed(TEST_GROUP_ID, TEST_TOPIC, partition)
            .await
            .expect("committed position is readable")
    }

    /// Wait until at least `n` records have been committed.
    pub async fn wait_for_commits(&self, n: u64) -> bool {
        self.wait_until(|health| health.commits() >= n).await
    }

    /// Wait until at least `n` failures have been counted.
    pub async fn wait_for_failures(&self, n: u64) -> bool {
        self.wait_until(|health| health.snapshot().total_failures >= n)
            .await
    }

    async fn wait_until(&self, done: impl Fn(&ConsumerHealth) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while tokio::time::Instant::now() < deadline {
            if done(&self.health) {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        done(&self.health)
    }

    /// Cancel the worker and wait for it to finish its in-flight record.
    pub async fn stop(&mut self) -> Result<(), PipelineError> {
        self.cancel.cancel();
        match self.worker.take() {
            Some(worker) => worker.await.expect("consumer task did not panic"),
            None => Ok(()),
        }
    }

    /// Wait for the worker to end on its own, e.g. after a fatal error.
    pub async fn join(&mut self) -> Result<(), PipelineError> {
        let worker = self.worker.take().expect("consumer is running");
        tokio::time::timeout(WAIT_LIMIT, worker)
            .await
            .expect("consumer stopped in time")
            .expect("consumer task did not panic")
    }
}

impl Drop for PipelineHarness {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
