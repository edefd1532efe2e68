//! Fault-injecting [`EventLog`] wrapper.
//!
//! Delegates to an inner log, failing the next N fetches or commits with
//! `LogError::Unavailable`, the way a flapping broker connection would.
//! Successful commits are recorded in order.

use provisioner::log::{
    EventLog, FetchRequest, GroupPosition, LogError, LogRecord, RecordPosition,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub struct FaultyLog {
    inner: Arc<dyn EventLog>,
    fail_fetches: AtomicU32,
    fail_commits: AtomicU32,
    fail_appends: AtomicU32,
    commit_calls: AtomicU64,
    commits: Mutex<Vec<(i32, i64)>>,
}

impl FaultyLog {
    pub fn new(inner: Arc<dyn EventLog>) -> Self {
        Self {
            inner,
            fail_fetches: AtomicU32::new(0),
            fail_commits: AtomicU32::new(0),
            fail_appends: AtomicU32::new(0),
            commit_calls: AtomicU64::new(0),
            commits: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> Arc<dyn EventLog> {
        Arc::clone(&self.inner)
    }

    pub fn fail_next_fetches(&self, n: u32) {
        self.fail_fetches.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_commits(&self, n: u32) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_appends(&self, n: u32) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    /// Commit calls that reached the wrapper, failed ones included.
    pub fn commit_calls(&self) -> u64 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// `(partition, offset)` of every commit the inner log accepted, in call
    /// order.
    pub fn committed_sequence(&self) -> Vec<(i32, i64)> {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take(counter: &AtomicU32, what: &str) -> Result<(), LogError> {
        let injected = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LogError::Unavailable(format!("injected {what} failure")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventLog for FaultyLog {
    async fn append(
        &self,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<RecordPosition, LogError> {
        Self::take(&self.fail_appends, "append")?;
        self.inner.append(topic, key, value).await
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<LogRecord>, LogError> {
        Self::take(&self.fail_fetches, "fetch")?;
        self.inner.fetch(request).await
    }

    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), LogError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        Self::take(&self.fail_commits, "commit")?;
        self.inner.commit(group, topic, partition, offset).await?;
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((partition, offset));
        Ok(())
    }

    async fn committed(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, LogError> {
        self.inner.committed(group, topic, partition).await
    }

    async fn group_positions(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Vec<GroupPosition>, LogError> {
        self.inner.group_positions(topic, partition).await
    }

    async fn earliest_offset(&self, topic: &str, partition: i32) -> Result<i64, LogError> {
        self.inner.earliest_offset(topic, partition).await
    }

    async fn latest_offset(&self, topic: &str, partition: i32) -> Result<i64, LogError> {
        self.inner.latest_offset(topic, partition).await
    }

    async fn delete_records(
        &self,
        topic: &str,
        partition: i32,
        before: i64,
    ) -> Result<i64, LogError> {
        self.inner.delete_records(topic, partition, before).await
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, LogError> {
        self.inner.partitions(topic).await
    }

    async fn close(&self) -> Result<(), LogError> {
        self.inner.close().await
    }
}
