//! In-process log backend.
//!
//! Partitioned topics with per-partition monotonic offsets, per-group
//! committed positions and a per-partition log start (retention watermark).
//! Fetches block until enough data arrives or the wait expires. With a data
//! directory every mutation is journaled before it is applied, so records,
//! commits and trims survive a restart. Journal I/O runs on the blocking pool
//! under its own lock; the state lock is only held for in-memory work. The
//! journal is compacted to a snapshot once it grows past a threshold.

use super::journal::{decode_bytes, Journal, JournalEntry};
use super::{EventLog, FetchRequest, GroupPosition, LogError, LogRecord, RecordPosition};
use crate::config::{DEFAULT_COMPACT_AFTER_ENTRIES, DEFAULT_MAX_FETCH_BYTES};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct LocalLogConfig {
    pub topics: Vec<String>,
    pub partitions: i32,
    /// Appends larger than this are rejected.
    pub max_message_bytes: usize,
    /// Journal directory. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Compact once the journal holds this many entries, or twice the live
    /// snapshot, whichever is larger.
    pub compact_after_entries: usize,
}

impl LocalLogConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topics: vec![topic.into()],
            partitions: 1,
            max_message_bytes: DEFAULT_MAX_FETCH_BYTES,
            data_dir: None,
            compact_after_entries: DEFAULT_COMPACT_AFTER_ENTRIES,
        }
    }

    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_compact_after(mut self, entries: usize) -> Self {
        self.compact_after_entries = entries;
        self
    }
}

#[derive(Debug, Default)]
struct PartitionLog {
    log_start: i64,
    next_offset: i64,
    records: VecDeque<LogRecord>,
    /// Cumulative bytes appended, used by the least-bytes balancer.
    bytes_written: u64,
}

impl PartitionLog {
    fn out_of_range(&self, topic: &str, partition: i32, requested: i64) -> LogError {
        LogError::OffsetOutOfRange {
            topic: topic.to_string(),
            partition,
            requested,
            earliest: self.log_start,
            latest: self.next_offset,
        }
    }

    fn push(&mut self, record: LogRecord) {
        self.bytes_written += record.size_bytes() as u64;
        self.next_offset = record.offset + 1;
        self.records.push_back(record);
    }

    /// Drop records below `before` and move the log start up to it.
    fn truncate_front(&mut self, before: i64) {
        while self.records.front().is_some_and(|r| r.offset < before) {
            self.records.pop_front();
        }
        self.log_start = self.log_start.max(before);
        self.next_offset = self.next_offset.max(self.log_start);
    }
}

/// Commit key: topic, partition, group.
type CommitKey = (String, i32, String);

struct LogState {
    topics: HashMap<String, Vec<PartitionLog>>,
    commits: BTreeMap<CommitKey, i64>,
    closed: bool,
}

impl LogState {
    fn ensure_open(&self) -> Result<(), LogError> {
        if self.closed {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    fn partition(&self, topic: &str, partition: i32) -> Result<&PartitionLog, LogError> {
        let partitions = self
            .topics
            .get(topic)
            .ok_or_else(|| LogError::UnknownTopic(topic.to_string()))?;
        usize::try_from(partition)
            .ok()
            .and_then(|index| partitions.get(index))
            .ok_or_else(|| LogError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    fn partition_mut(
        &mut self,
        topic: &str,
        partition: i32,
    ) -> Result<&mut PartitionLog, LogError> {
        let partitions = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| LogError::UnknownTopic(topic.to_string()))?;
        usize::try_from(partition)
            .ok()
            .and_then(|index| partitions.get_mut(index))
            .ok_or_else(|| LogError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    /// Partition with the fewest bytes appended so far; lowest index wins ties.
    fn least_bytes_partition(&self, topic: &str) -> Result<i32, LogError> {
        let partitions = self
            .topics
            .get(topic)
            .ok_or_else(|| LogError::UnknownTopic(topic.to_string()))?;
        let index = partitions
            .iter()
            .enumerate()
            .min_by_key(|(index, p)| (p.bytes_written, *index))
            .map(|(index, _)| index)
            .ok_or_else(|| LogError::UnknownTopic(topic.to_string()))?;
        i32::try_from(index).map_err(|_| LogError::UnknownPartition {
            topic: topic.to_string(),
            partition: i32::MAX,
        })
    }

    fn collect(&self, request: &FetchRequest) -> Result<Vec<LogRecord>, LogError> {
        let mut batch = Vec::new();
        let mut bytes = 0usize;

        for &(partition, offset) in &request.positions {
            let log = self.partition(&request.topic, partition)?;
            if offset < log.log_start || offset > log.next_offset {
                return Err(log.out_of_range(&request.topic, partition, offset));
            }
            let skip = usize::try_from(offset - log.log_start).unwrap_or(0);
            for record in log.records.iter().skip(skip) {
                let size = record.size_bytes();
                if !batch.is_empty() && bytes + size > request.max_bytes {
                    return Ok(batch);
                }
                bytes += size;
                batch.push(record.clone());
            }
        }

        Ok(batch)
    }

    /// Entries that rebuild the current state from scratch.
    fn snapshot(&self) -> Vec<JournalEntry> {
        let mut entries = Vec::new();
        let mut topics: Vec<_> = self.topics.iter().collect();
        topics.sort_by(|a, b| a.0.cmp(b.0));

        for (topic, partitions) in topics {
            for (index, log) in partitions.iter().enumerate() {
                let partition = i32::try_from(index).unwrap_or(i32::MAX);
                entries.push(JournalEntry::Trim {
                    topic: topic.clone(),
                    partition,
                    log_start: log.log_start,
                });
                entries.extend(log.records.iter().map(|r| {
                    JournalEntry::append(topic, partition, r.offset, &r.key, &r.value, r.appended_at)
                }));
            }
        }

        entries.extend(
            self.commits
                .iter()
                .map(|((topic, partition, group), offset)| JournalEntry::Commit {
                    group: group.clone(),
                    topic: topic.clone(),
                    partition: *partition,
                    offset: *offset,
                }),
        );
        entries
    }

    /// Apply a journaled mutation, live or during replay.
    fn apply(&mut self, entry: JournalEntry) -> Result<(), LogError> {
        match entry {
            JournalEntry::Append {
                topic,
                partition,
                offset,
                key,
                value,
                appended_at,
            } => {
                let record = LogRecord {
                    topic: topic.clone(),
                    partition,
                    offset,
                    key: decode_bytes(&key)?,
                    value: decode_bytes(&value)?,
                    appended_at,
                };
                let log = self.partition_mut(&topic, partition)?;
                if offset != log.next_offset {
                    return Err(LogError::Io(format!(
                        "journal offset gap on {topic}/{partition}: expected {}, found {offset}",
                        log.next_offset
                    )));
                }
                log.push(record);
            }
            JournalEntry::Commit {
                group,
                topic,
                partition,
                offset,
            } => {
                self.partition(&topic, partition)?;
                let position = self.commits.entry((topic, partition, group)).or_insert(offset);
                *position = (*position).max(offset);
            }
            JournalEntry::Trim {
                topic,
                partition,
                log_start,
            } => {
                self.partition_mut(&topic, partition)?
                    .truncate_front(log_start);
            }
        }
        Ok(())
    }
}

/// Serializes journaled mutations. Holding this lock while preparing,
/// writing and applying keeps journal order equal to state order.
struct JournalWriter {
    journal: Journal,
    compact_after: usize,
    next_compaction: usize,
}

impl JournalWriter {
    fn new(journal: Journal, compact_after: usize) -> Self {
        Self {
            journal,
            compact_after,
            next_compaction: compact_after,
        }
    }

    fn maybe_compact(&mut self, state: &Mutex<LogState>) -> Result<(), LogError> {
        let lines = self.journal.lines();
        if lines < self.next_compaction {
            return Ok(());
        }

        let snapshot = lock(state)?.snapshot();
        match self.journal.rewrite(&snapshot) {
            Ok(()) => {
                self.next_compaction = self.compact_after.max(snapshot.len().saturating_mul(2));
                debug!(
                    target: "provisioner.log",
                    before = lines,
                    after = snapshot.len(),
                    "Compacted journal"
                );
            }
            Err(e) => {
                // Every entry is already durable; retry after another batch
                self.next_compaction = lines.saturating_add(self.compact_after);
                warn!(target: "provisioner.log", error = %e, "Journal compaction failed");
            }
        }
        Ok(())
    }
}

/// Outcome of validating a mutation against the current state.
struct Prepared<T> {
    result: T,
    /// `None` when the mutation is a no-op.
    entry: Option<JournalEntry>,
}

/// In-process [`EventLog`].
pub struct LocalLog {
    state: Arc<Mutex<LogState>>,
    writer: Option<Arc<Mutex<JournalWriter>>>,
    appended: Notify,
    max_message_bytes: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, LogError> {
    mutex
        .lock()
        .map_err(|_| LogError::Unavailable("log state lock poisoned".to_string()))
}

fn lock_open(state: &Mutex<LogState>) -> Result<MutexGuard<'_, LogState>, LogError> {
    let guard = lock(state)?;
    guard.ensure_open()?;
    Ok(guard)
}

impl LocalLog {
    /// Create the configured topics and, when a data directory is set,
    /// replay its journal.
    pub fn open(config: LocalLogConfig) -> Result<Self, LogError> {
        if config.partitions < 1 {
            return Err(LogError::Unavailable(format!(
                "partition count must be at least 1, got {}",
                config.partitions
            )));
        }

        let topics = config
            .topics
            .iter()
            .map(|topic| {
                let partitions = (0..config.partitions)
                    .map(|_| PartitionLog::default())
                    .collect();
                (topic.clone(), partitions)
            })
            .collect();

        let mut state = LogState {
            topics,
            commits: BTreeMap::new(),
            closed: false,
        };

        let mut writer = None;
        if let Some(dir) = &config.data_dir {
            let (journal, entries) = Journal::open(dir)?;
            let replayed = entries.len();
            for entry in entries {
                state.apply(entry)?;
            }
            writer = Some(Arc::new(Mutex::new(JournalWriter::new(
                journal,
                config.compact_after_entries.max(1),
            ))));
            info!(
                target: "provisioner.log",
                data_dir = %dir.display(),
                replayed_entries = replayed,
                "Opened journaled log"
            );
        } else {
            debug!(target: "provisioner.log", "Opened in-memory log");
        }

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            writer,
            appended: Notify::new(),
            max_message_bytes: config.max_message_bytes,
        })
    }

    /// Convenience constructor for a memory-only single topic.
    pub fn in_memory(topic: &str, partitions: i32) -> Result<Self, LogError> {
        Self::open(LocalLogConfig::new(topic).with_partitions(partitions))
    }

    fn open_state(&self) -> Result<MutexGuard<'_, LogState>, LogError> {
        lock_open(&self.state)
    }

    /// Validate a mutation with `prepare`, journal the entry it yields, then
    /// apply it. With a journal the whole sequence runs on the blocking pool.
    async fn mutate<T, F>(&self, prepare: F) -> Result<T, LogError>
    where
        T: Send + 'static,
        F: FnOnce(&LogState) -> Result<Prepared<T>, LogError> + Send + 'static,
    {
        let Some(writer) = &self.writer else {
            let mut state = self.open_state()?;
            let prepared = prepare(&state)?;
            if let Some(entry) = prepared.entry {
                state.apply(entry)?;
            }
            return Ok(prepared.result);
        };

        let writer = Arc::clone(writer);
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || -> Result<T, LogError> {
            let mut writer = lock(&writer)?;
            let prepared = prepare(&*lock_open(&state)?)?;
            let Some(entry) = prepared.entry else {
                return Ok(prepared.result);
            };

            writer.journal.write(&entry)?;
            lock(&state)?.apply(entry)?;
            writer.maybe_compact(&state)?;
            Ok(prepared.result)
        })
        .await
        .map_err(|e| LogError::Unavailable(format!("journal task failed: {e}")))?
    }
}

#[async_trait::async_trait]
impl EventLog for LocalLog {
    async fn append(
        &self,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<RecordPosition, LogError> {
        let size = key.len() + value.len();
        if size > self.max_message_bytes {
            return Err(LogError::MessageTooLarge {
                size,
                max: self.max_message_bytes,
            });
        }

        let topic = topic.to_string();
        let (key, value) = (key.to_vec(), value.to_vec());
        let position = self
            .mutate(move |state| {
                let partition = state.least_bytes_partition(&topic)?;
                let offset = state.partition(&topic, partition)?.next_offset;
                Ok(Prepared {
                    result: RecordPosition { partition, offset },
                    entry: Some(JournalEntry::append(
                        &topic,
                        partition,
                        offset,
                        &key,
                        &value,
                        Utc::now(),
                    )),
                })
            })
            .await?;

        self.appended.notify_waiters();
        Ok(position)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<LogRecord>, LogError> {
        let deadline = Instant::now() + request.max_wait;
        let mut expired = false;

        loop {
            // Register for wakeups before looking, so an append between the
            // check and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = {
                let state = self.open_state()?;
                state.collect(request)?
            };

            let bytes: usize = batch.iter().map(LogRecord::size_bytes).sum();
            if expired || (!batch.is_empty() && bytes >= request.min_bytes) {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                expired = true;
            }
        }
    }

    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), LogError> {
        let (group, topic) = (group.to_string(), topic.to_string());
        self.mutate(move |state| {
            state.partition(&topic, partition)?;
            let key = (topic.clone(), partition, group.clone());
            let entry = match state.commits.get(&key) {
                Some(current) if *current >= offset => None,
                _ => Some(JournalEntry::Commit {
                    group,
                    topic,
                    partition,
                    offset,
                }),
            };
            Ok(Prepared { result: (), entry })
        })
        .await
    }

    async fn committed(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, LogError> {
        let state = self.open_state()?;
        state.partition(topic, partition)?;
        Ok(state
            .commits
            .get(&(topic.to_string(), partition, group.to_string()))
            .copied())
    }

    async fn group_positions(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Vec<GroupPosition>, LogError> {
        let state = self.open_state()?;
        state.partition(topic, partition)?;
        Ok(state
            .commits
            .iter()
            .filter(|((t, p, _), _)| t == topic && *p == partition)
            .map(|((_, _, group), offset)| GroupPosition {
                group: group.clone(),
                offset: *offset,
            })
            .collect())
    }

    async fn earliest_offset(&self, topic: &str, partition: i32) -> Result<i64, LogError> {
        Ok(self.open_state()?.partition(topic, partition)?.log_start)
    }

    async fn latest_offset(&self, topic: &str, partition: i32) -> Result<i64, LogError> {
        Ok(self.open_state()?.partition(topic, partition)?.next_offset)
    }

    async fn delete_records(
        &self,
        topic: &str,
        partition: i32,
        before: i64,
    ) -> Result<i64, LogError> {
        let topic = topic.to_string();
        self.mutate(move |state| {
            let log = state.partition(&topic, partition)?;
            if before > log.next_offset {
                return Err(log.out_of_range(&topic, partition, before));
            }
            if before <= log.log_start {
                return Ok(Prepared {
                    result: log.log_start,
                    entry: None,
                });
            }
            Ok(Prepared {
                result: before,
                entry: Some(JournalEntry::Trim {
                    topic,
                    partition,
                    log_start: before,
                }),
            })
        })
        .await
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, LogError> {
        let state = self.open_state()?;
        let count = state
            .topics
            .get(topic)
            .ok_or_else(|| LogError::UnknownTopic(topic.to_string()))?
            .len();
        Ok((0..i32::try_from(count).unwrap_or(i32::MAX)).collect())
    }

    async fn close(&self) -> Result<(), LogError> {
        lock(&self.state)?.closed = true;
        self.appended.notify_waiters();
        debug!(target: "provisioner.log", "Log closed");
        Ok(())
    }
}
