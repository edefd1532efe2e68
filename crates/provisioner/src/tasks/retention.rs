//! Periodic retention task.
//!
//! Trims every partition of the signup topic up to the lowest position
//! committed by any consumer group, so processed records do not accumulate
//! in the log under the plain `commit` policy.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered. A pass that is
//! already running finishes first.

use crate::services::RetentionTrimmer;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Start the retention background task.
///
/// Runs one pass per `interval` until `cancel_token` fires.
#[instrument(skip_all, name = "provisioner.task.retention")]
pub async fn start_retention_task(
    trimmer: RetentionTrimmer,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "provisioner.task.retention",
        interval_secs = interval.as_secs(),
        "Starting retention task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_retention_pass(&trimmer).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "provisioner.task.retention",
                    "Retention task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "provisioner.task.retention", "Retention task stopped");
}

/// Run a single retention pass over all partitions.
///
/// Returns the number of partitions whose watermark advanced. Failures are
/// logged and left for the next pass.
pub async fn run_retention_pass(trimmer: &RetentionTrimmer) -> usize {
    let partitions = match trimmer.partitions().await {
        Ok(partitions) => partitions,
        Err(e) => {
            warn!(
                target: "provisioner.task.retention",
                error = %e,
                "Failed to list partitions for retention"
            );
            return 0;
        }
    };

    let mut advanced = 0;
    for partition in partitions {
        match trimmer.trim_to_committed(partition).await {
            Ok(Some(report)) if report.advanced() => advanced += 1,
            Ok(_) => {}
            Err(e) => {
                warn!(
                    target: "provisioner.task.retention",
                    partition = partition,
                    error = %e,
                    "Retention pass failed for partition"
                );
            }
        }
    }

    debug!(
        target: "provisioner.task.retention",
        advanced = advanced,
        "Retention pass complete"
    );
    advanced
}
