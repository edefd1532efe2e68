//! Retention trimmer.
//!
//! Advances a partition's retention watermark. Irreversible, so every trim
//! is checked against the committed positions of all consumer groups on the
//! partition and refused when it would discard a record some group has not
//! processed yet.

use crate::errors::PipelineError;
use crate::log::EventLog;
use crate::observability::metrics::record_trim;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Watermark readings around one trim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimReport {
    pub partition: i32,
    pub requested: i64,
    pub earliest_before: i64,
    pub earliest_after: i64,
}

impl TrimReport {
    pub fn advanced(&self) -> bool {
        self.earliest_after > self.earliest_before
    }
}

#[derive(Clone)]
pub struct RetentionTrimmer {
    log: Arc<dyn EventLog>,
    topic: String,
}

impl RetentionTrimmer {
    pub fn new(log: Arc<dyn EventLog>, topic: impl Into<String>) -> Self {
        Self {
            log,
            topic: topic.into(),
        }
    }

    /// Discard every record of `partition` below `offset`.
    ///
    /// An `offset` at or below the current watermark is a no-op.
    ///
    /// # Errors
    ///
    /// `TrimAheadOfCommit` when a group's committed position is below
    /// `offset`; log errors otherwise.
    #[instrument(skip_all, name = "provisioner.trimmer.trim_before", fields(partition = partition, offset = offset))]
    pub async fn trim_before(&self, partition: i32, offset: i64) -> Result<TrimReport, PipelineError> {
        let earliest_before = self.log.earliest_offset(&self.topic, partition).await?;
        if offset <= earliest_before {
            record_trim("noop");
            return Ok(TrimReport {
                partition,
                requested: offset,
                earliest_before,
                earliest_after: earliest_before,
            });
        }

        let positions = self.log.group_positions(&self.topic, partition).await?;
        if let Some(lagging) = positions
            .iter()
            .filter(|p| p.offset < offset)
            .min_by_key(|p| p.offset)
        {
            record_trim("rejected");
            warn!(
                target: "provisioner.trimmer",
                partition = partition,
                requested = offset,
                group = %lagging.group,
                committed = lagging.offset,
                "Refusing to trim past a consumer group's committed position"
            );
            return Err(PipelineError::TrimAheadOfCommit {
                partition,
                requested: offset,
                group: lagging.group.clone(),
                committed: lagging.offset,
            });
        }

        if let Err(e) = self.log.delete_records(&self.topic, partition, offset).await {
            record_trim("error");
            return Err(e.into());
        }

        // Read back rather than trusting the delete response
        let earliest_after = self.log.earliest_offset(&self.topic, partition).await?;
        if earliest_after < offset {
            warn!(
                target: "provisioner.trimmer",
                partition = partition,
                requested = offset,
                earliest_before = earliest_before,
                earliest_after = earliest_after,
                "Retention watermark did not advance as requested"
            );
        } else {
            info!(
                target: "provisioner.trimmer",
                partition = partition,
                earliest_before = earliest_before,
                earliest_after = earliest_after,
                "Advanced retention watermark"
            );
        }
        record_trim("success");

        Ok(TrimReport {
            partition,
            requested: offset,
            earliest_before,
            earliest_after,
        })
    }

    pub async fn partitions(&self) -> Result<Vec<i32>, PipelineError> {
        Ok(self.log.partitions(&self.topic).await?)
    }

    /// Trim `partition` up to the lowest position committed by any group.
    /// `Ok(None)` when no group has committed on it.
    pub async fn trim_to_committed(&self, partition: i32) -> Result<Option<TrimReport>, PipelineError> {
        let positions = self.log.group_positions(&self.topic, partition).await?;
        let Some(min_committed) = positions.iter().map(|p| p.offset).min() else {
            return Ok(None);
        };
        self.trim_before(partition, min_committed).await.map(Some)
    }
}
