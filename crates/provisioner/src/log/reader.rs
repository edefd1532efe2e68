//! Consumer-group reader.
//!
//! A single in-process member owns every partition of the topic. Positions
//! start at the group's committed offsets (offset 0 for a group that never
//! committed) and advance as batches are fetched.

use super::{EventLog, FetchRequest, LogError, LogRecord};
use crate::config::Config;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub max_wait: Duration,
}

impl FetchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_bytes: config.min_fetch_bytes,
            max_bytes: config.max_fetch_bytes,
            max_wait: config.fetch_max_wait,
        }
    }
}

pub struct GroupReader {
    log: Arc<dyn EventLog>,
    topic: String,
    group: String,
    settings: FetchSettings,
    /// Next offset to fetch, per partition.
    positions: BTreeMap<i32, i64>,
    buffer: VecDeque<LogRecord>,
}

impl GroupReader {
    /// Join `group` on `topic`, taking every partition.
    pub async fn join(
        log: Arc<dyn EventLog>,
        topic: &str,
        group: &str,
        settings: FetchSettings,
    ) -> Result<Self, LogError> {
        let mut positions = BTreeMap::new();
        for partition in log.partitions(topic).await? {
            let start = log.committed(group, topic, partition).await?.unwrap_or(0);
            positions.insert(partition, start);
        }

        debug!(
            target: "provisioner.log",
            topic = %topic,
            group = %group,
            positions = ?positions,
            "Joined consumer group"
        );

        Ok(Self {
            log,
            topic: topic.to_string(),
            group: group.to_string(),
            settings,
            positions,
            buffer: VecDeque::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Next offset this reader will fetch on `partition`.
    pub fn position(&self, partition: i32) -> Option<i64> {
        self.positions.get(&partition).copied()
    }

    /// Next buffered record, fetching when the buffer is empty.
    ///
    /// `Ok(None)` means the fetch wait expired with no data. Cancel safe:
    /// nothing changes until the fetch has returned.
    pub async fn next_record(&mut self) -> Result<Option<LogRecord>, LogError> {
        if let Some(record) = self.buffer.pop_front() {
            return Ok(Some(record));
        }

        let request = FetchRequest {
            topic: self.topic.clone(),
            positions: self.positions.iter().map(|(p, o)| (*p, *o)).collect(),
            min_bytes: self.settings.min_bytes,
            max_bytes: self.settings.max_bytes,
            max_wait: self.settings.max_wait,
        };
        let batch = self.log.fetch(&request).await?;

        for record in batch {
            self.positions.insert(record.partition, record.offset + 1);
            self.buffer.push_back(record);
        }
        Ok(self.buffer.pop_front())
    }

    /// Rewind (or advance) `partition` to `offset`, dropping any buffered
    /// records of that partition so they are fetched again.
    pub fn seek(&mut self, partition: i32, offset: i64) {
        self.buffer.retain(|record| record.partition != partition);
        self.positions.insert(partition, offset);
    }

    /// Move `partition` to its earliest retained offset. Returns that offset.
    pub async fn reset_to_earliest(&mut self, partition: i32) -> Result<i64, LogError> {
        let earliest = self.log.earliest_offset(&self.topic, partition).await?;
        self.seek(partition, earliest);
        Ok(earliest)
    }

    /// Durably record that `record` has been processed: the group's position
    /// becomes `record.offset + 1`.
    pub async fn commit(&self, record: &LogRecord) -> Result<(), LogError> {
        self.log
            .commit(&self.group, &self.topic, record.partition, record.offset + 1)
            .await
    }
}
