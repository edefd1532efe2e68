//! Metrics definitions for the provisioner
//!
//! All metrics follow Prometheus naming conventions:
//! - `provisioner_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `status`: success, error
//! - `outcome`: issued, discarded_user_not_found, discarded_undecodable
//! - `reason`: the five [`crate::credentials::AuthFailure`] labels or `none`
//! - `partition`: bounded by the configured partition count

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("provisioner_signup_processing".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set processing buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Publisher Metrics
// ============================================================================

/// Record a signup publish attempt
///
/// Metric: `provisioner_signup_events_published_total`
/// Labels: `status`
pub fn record_publish(status: &str) {
    counter!("provisioner_signup_events_published_total", "status" => status.to_string())
        .increment(1);
}

// ============================================================================
// Consumer Metrics
// ============================================================================

/// Record the outcome of processing one signup event
///
/// Metric: `provisioner_signup_events_consumed_total`,
/// `provisioner_signup_processing_duration_seconds`
/// Labels: `outcome`
pub fn record_event_processed(outcome: &str, duration: Duration) {
    histogram!("provisioner_signup_processing_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());

    counter!("provisioner_signup_events_consumed_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// Metric: `provisioner_consumer_read_errors_total`
pub fn record_read_error() {
    counter!("provisioner_consumer_read_errors_total").increment(1);
}

/// Metric: `provisioner_consumer_persist_errors_total`
pub fn record_persist_error() {
    counter!("provisioner_consumer_persist_errors_total").increment(1);
}

/// Record a commit attempt
///
/// Metric: `provisioner_consumer_commits_total`
/// Labels: `status`
pub fn record_commit(status: &str) {
    counter!("provisioner_consumer_commits_total", "status" => status.to_string()).increment(1);
}

/// Records that fell below the retention watermark before this group read them
///
/// Metric: `provisioner_consumer_records_lost_total`
/// Labels: `partition`
pub fn record_records_lost(partition: i32, count: i64) {
    counter!("provisioner_consumer_records_lost_total", "partition" => partition.to_string())
        .increment(u64::try_from(count).unwrap_or(0));
}

/// Metric: `provisioner_consumer_consecutive_failures`
pub fn set_consecutive_failures(count: u64) {
    gauge!("provisioner_consumer_consecutive_failures").set(count as f64);
}

// ============================================================================
// Retention Metrics
// ============================================================================

/// Record a retention trim
///
/// Metric: `provisioner_retention_trims_total`
/// Labels: `status` (success, noop, rejected, error)
pub fn record_trim(status: &str) {
    counter!("provisioner_retention_trims_total", "status" => status.to_string()).increment(1);
}

// ============================================================================
// Credential Metrics
// ============================================================================

/// Record token validation result
///
/// Metric: `provisioner_token_validations_total`
/// Labels: `status`, `reason`
pub fn record_token_validation(status: &str, reason: Option<&str>) {
    let reason = reason.unwrap_or("none");
    counter!("provisioner_token_validations_total", "status" => status.to_string(), "reason" => reason.to_string())
        .increment(1);
}
