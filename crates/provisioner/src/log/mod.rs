//! Durable partitioned log.
//!
//! The pipeline talks to the log only through [`EventLog`], an explicitly
//! constructed client with an `open`/`close` lifecycle. [`local::LocalLog`]
//! is the in-process backend (optionally journaled to disk) used by the
//! binary and by tests.

pub mod journal;
pub mod local;
pub mod reader;

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

pub use local::{LocalLog, LocalLogConfig};
pub use reader::{FetchSettings, GroupReader};

/// A single message as stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub appended_at: DateTime<Utc>,
}

impl LogRecord {
    /// Size used for fetch byte accounting and partition balancing.
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Where an appended record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    pub partition: i32,
    pub offset: i64,
}

/// A consumer group's committed position on one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPosition {
    pub group: String,
    /// Next offset the group will read.
    pub offset: i64,
}

/// A multi-partition fetch.
///
/// Returns as soon as at least `min_bytes` are available across the
/// requested partitions, or when `max_wait` elapses (possibly empty).
/// At most `max_bytes` are returned, except that a single record larger than
/// the remaining budget is still returned when it is the first one.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub topic: String,
    /// `(partition, offset)` pairs to read from.
    pub positions: Vec<(i32, i64)>,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub max_wait: Duration,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Log unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: i32 },

    /// The requested offset is no longer (or not yet) in the log.
    #[error(
        "Offset {requested} out of range for {topic}/{partition} \
         (earliest {earliest}, latest {latest})"
    )]
    OffsetOutOfRange {
        topic: String,
        partition: i32,
        requested: i64,
        earliest: i64,
        latest: i64,
    },

    #[error("Message of {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Log client is closed")]
    Closed,

    #[error("Log I/O error: {0}")]
    Io(String),
}

/// Client interface to a durable, partitioned, append-only log with
/// consumer-group offset tracking.
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append one record. The partition is chosen by the log's balancer.
    async fn append(&self, topic: &str, key: &[u8], value: &[u8])
        -> Result<RecordPosition, LogError>;

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<LogRecord>, LogError>;

    /// Durably store `offset` (the next offset to read) for a group.
    /// Commits never move a group's position backwards.
    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), LogError>;

    /// Committed position for a group, `None` if the group never committed.
    async fn committed(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, LogError>;

    /// Committed positions of every group on a partition.
    async fn group_positions(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Vec<GroupPosition>, LogError>;

    /// Earliest retained offset (the retention watermark).
    async fn earliest_offset(&self, topic: &str, partition: i32) -> Result<i64, LogError>;

    /// Offset the next appended record will receive.
    async fn latest_offset(&self, topic: &str, partition: i32) -> Result<i64, LogError>;

    /// Discard every record below `before`. Returns the resulting earliest
    /// offset. Does not consult consumer-group positions.
    async fn delete_records(
        &self,
        topic: &str,
        partition: i32,
        before: i64,
    ) -> Result<i64, LogError>;

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, LogError>;

    /// Release the client. Pending and later calls fail with `Closed`.
    async fn close(&self) -> Result<(), LogError>;
}
