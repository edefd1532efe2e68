//! Signup event consumer.
//!
//! One long-lived worker per process runs a strictly sequential loop:
//!
//! ```text
//! Idle -> Reading -> Processing -> Committing -> Reading -> ...
//!            |
//!            +-> Stopped (cancellation)
//! ```
//!
//! A record's read position is committed only after its credential has been
//! persisted (or the record has been deliberately discarded). Any failure in
//! between rewinds the reader to the failed offset, so the record is
//! redelivered after a bounded backoff and no later offset of that partition
//! is committed first. Delivery is at-least-once; re-issuing a credential is
//! idempotent.
//!
//! Cancellation is observed only while waiting for a record or backing off,
//! so an in-flight record always finishes committing before the loop exits.

use crate::config::{CommitPolicy, Config};
use crate::credentials::CredentialIssuer;
use crate::errors::PipelineError;
use crate::log::{EventLog, FetchSettings, GroupReader, LogError, LogRecord};
use crate::models::{SignupEvent, UserId};
use crate::observability::metrics::{
    record_commit, record_event_processed, record_persist_error, record_read_error,
    record_records_lost, set_consecutive_failures,
};
use crate::observability::{hash_for_correlation, ConsumerHealth, ConsumerState};
use crate::repositories::UserStore;
use crate::services::trimmer::RetentionTrimmer;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    pub group_id: String,
    pub fetch: FetchSettings,
    pub commit_policy: CommitPolicy,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            topic: config.topic.clone(),
            group_id: config.group_id.clone(),
            fetch: FetchSettings::from_config(config),
            commit_policy: config.commit_policy,
            retry_initial_backoff: config.retry_initial_backoff,
            retry_max_backoff: config.retry_max_backoff,
        }
    }
}

/// Why a record was committed without issuing a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No live user has the announced identity.
    UserNotFound,
    /// Key or value is not UTF-8.
    Undecodable,
}

/// Result of processing one record. Both variants are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Issued {
        user_id: UserId,
        expires_at: DateTime<Utc>,
    },
    Discarded(DiscardReason),
}

impl ProcessOutcome {
    fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Issued { .. } => "issued",
            ProcessOutcome::Discarded(DiscardReason::UserNotFound) => "discarded_user_not_found",
            ProcessOutcome::Discarded(DiscardReason::Undecodable) => "discarded_undecodable",
        }
    }
}

/// Exponential backoff: initial, doubling, capped at max.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

pub struct SignupConsumer {
    reader: GroupReader,
    users: Arc<dyn UserStore>,
    issuer: CredentialIssuer,
    /// Present under [`CommitPolicy::CommitAndTrim`].
    trimmer: Option<RetentionTrimmer>,
    health: Arc<ConsumerHealth>,
    backoff: Backoff,
}

impl SignupConsumer {
    /// Join the consumer group and prepare the worker. Reading starts in
    /// [`SignupConsumer::run`].
    pub async fn join(
        log: Arc<dyn EventLog>,
        users: Arc<dyn UserStore>,
        issuer: CredentialIssuer,
        settings: ConsumerSettings,
        health: Arc<ConsumerHealth>,
    ) -> Result<Self, PipelineError> {
        let reader = GroupReader::join(
            Arc::clone(&log),
            &settings.topic,
            &settings.group_id,
            settings.fetch,
        )
        .await?;

        let trimmer = match settings.commit_policy {
            CommitPolicy::Commit => None,
            CommitPolicy::CommitAndTrim => Some(RetentionTrimmer::new(log, settings.topic.clone())),
        };

        health.set_state(ConsumerState::Idle);

        Ok(Self {
            reader,
            users,
            issuer,
            trimmer,
            health,
            backoff: Backoff::new(settings.retry_initial_backoff, settings.retry_max_backoff),
        })
    }

    pub fn health(&self) -> Arc<ConsumerHealth> {
        Arc::clone(&self.health)
    }

    /// Process one record: resolve the user and persist a fresh credential.
    ///
    /// # Errors
    ///
    /// Store failures (retry by redelivery) and `Fatal` from the issuer.
    pub async fn handle_record(
        &self,
        record: &LogRecord,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, PipelineError> {
        let event = match SignupEvent::from_record(record) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    target: "provisioner.consumer",
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Discarding undecodable signup event"
                );
                return Ok(ProcessOutcome::Discarded(DiscardReason::Undecodable));
            }
        };
        let identity_hash = hash_for_correlation(event.identity());

        let Some(user) = self.users.find_by_identity(event.identity()).await? else {
            info!(
                target: "provisioner.consumer",
                identity_hash = %identity_hash,
                partition = event.partition,
                offset = event.offset,
                "Discarding signup event: user not found"
            );
            return Ok(ProcessOutcome::Discarded(DiscardReason::UserNotFound));
        };

        let credential = self.issuer.issue(user.user_id, now)?;

        match self.users.save_credential(user.user_id, &credential).await {
            Ok(()) => {
                debug!(
                    target: "provisioner.consumer",
                    user_id = %user.user_id,
                    partition = event.partition,
                    offset = event.offset,
                    expires_at = %credential.expires_at,
                    "Stored session credential"
                );
                Ok(ProcessOutcome::Issued {
                    user_id: user.user_id,
                    expires_at: credential.expires_at,
                })
            }
            // Deleted between lookup and write
            Err(PipelineError::NotFound(_)) => {
                info!(
                    target: "provisioner.consumer",
                    identity_hash = %identity_hash,
                    user_id = %user.user_id,
                    "Discarding signup event: user removed before credential was stored"
                );
                Ok(ProcessOutcome::Discarded(DiscardReason::UserNotFound))
            }
            Err(e) => Err(e),
        }
    }

    /// Run until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Only `Fatal` conditions end the worker with an error: a signing
    /// failure or a log client that was closed underneath it.
    #[instrument(skip_all, name = "provisioner.consumer.run")]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        info!(
            target: "provisioner.consumer",
            topic = %self.reader.topic(),
            group = %self.reader.group(),
            commit_and_trim = self.trimmer.is_some(),
            "Starting signup consumer"
        );

        let result = self.run_loop(&cancel).await;
        self.health.set_state(ConsumerState::Stopped);

        match &result {
            Ok(()) => info!(target: "provisioner.consumer", "Signup consumer stopped"),
            Err(e) => error!(target: "provisioner.consumer", error = %e, "Signup consumer failed"),
        }
        result
    }

    async fn run_loop(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        loop {
            // Reading
            self.health.set_state(ConsumerState::Reading);
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                next = self.reader.next_record() => next,
            };

            let record = match next {
                Ok(Some(record)) => record,
                Ok(None) => {
                    self.mark_healthy();
                    continue;
                }
                Err(LogError::OffsetOutOfRange {
                    partition,
                    requested,
                    earliest,
                    latest,
                    ..
                }) => {
                    let lost = (earliest - requested).max(0);
                    warn!(
                        target: "provisioner.consumer",
                        partition = partition,
                        requested = requested,
                        earliest = earliest,
                        latest = latest,
                        records_lost = lost,
                        "Read position outside retained log; resetting to earliest offset"
                    );
                    record_records_lost(partition, lost);
                    if let Err(e) = self.reader.reset_to_earliest(partition).await {
                        fail_if_closed(&e)?;
                        record_read_error();
                        if !self.pause(cancel, "reset read position", &e).await {
                            return Ok(());
                        }
                    }
                    continue;
                }
                Err(e) => {
                    fail_if_closed(&e)?;
                    record_read_error();
                    if !self.pause(cancel, "read", &e).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            // Processing
            self.health.set_state(ConsumerState::Processing);
            let started = Instant::now();
            let outcome = match self.handle_record(&record, Utc::now()).await {
                Ok(outcome) => outcome,
                Err(e @ PipelineError::Fatal(_)) => return Err(e),
                Err(e) => {
                    record_persist_error();
                    self.reader.seek(record.partition, record.offset);
                    if !self.pause(cancel, "process", &e).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            record_event_processed(outcome.label(), started.elapsed());
            match outcome {
                ProcessOutcome::Issued { .. } => self.health.record_processed(),
                ProcessOutcome::Discarded(_) => self.health.record_discarded(),
            }

            // Committing
            self.health.set_state(ConsumerState::Committing);
            if let Err(e) = self.reader.commit(&record).await {
                fail_if_closed(&e)?;
                record_commit("error");
                self.reader.seek(record.partition, record.offset);
                if !self.pause(cancel, "commit", &e).await {
                    return Ok(());
                }
                continue;
            }
            record_commit("success");
            self.health.record_commit();
            self.mark_healthy();

            if let Some(trimmer) = &self.trimmer {
                // The record is already committed; a failed trim is retried
                // implicitly by the next commit.
                if let Err(e) = trimmer.trim_to_committed(record.partition).await {
                    warn!(
                        target: "provisioner.consumer",
                        partition = record.partition,
                        error = %e,
                        "Retention trim after commit failed"
                    );
                }
            }
        }
    }

    fn mark_healthy(&mut self) {
        if self.health.consecutive_failures() > 0 {
            self.health.record_success();
            set_consecutive_failures(0);
        }
        self.backoff.reset();
    }

    /// Count a failure and back off. Returns `false` if cancelled meanwhile.
    async fn pause(
        &mut self,
        cancel: &CancellationToken,
        stage: &'static str,
        error: &(dyn std::fmt::Display + Sync),
    ) -> bool {
        let failures = self.health.record_failure();
        set_consecutive_failures(failures);
        let delay = self.backoff.next_delay();

        warn!(
            target: "provisioner.consumer",
            stage = stage,
            error = %error,
            consecutive_failures = failures,
            backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Consumer step failed; retrying after backoff"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

/// A closed log client cannot recover; stop the worker.
fn fail_if_closed(e: &LogError) -> Result<(), PipelineError> {
    if matches!(e, LogError::Closed) {
        return Err(PipelineError::Fatal(e.to_string()));
    }
    Ok(())
}
