//! Signup event publisher.
//!
//! Appends one record per signup, keyed and valued by the user's identity.
//! No lookups, no validation and no internal retry: the caller decides what a
//! publish failure means, and signup handlers use
//! [`SignupPublisher::publish_best_effort`] so that signup never fails on it.

use crate::errors::PipelineError;
use crate::log::{EventLog, RecordPosition};
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_publish;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct SignupPublisher {
    log: Arc<dyn EventLog>,
    topic: String,
}

impl SignupPublisher {
    pub fn new(log: Arc<dyn EventLog>, topic: impl Into<String>) -> Self {
        Self {
            log,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Append a signup notification for `identity`.
    ///
    /// # Errors
    ///
    /// Log errors are returned as-is after classification; nothing is retried.
    #[instrument(skip_all, name = "provisioner.publisher.publish")]
    pub async fn publish(&self, identity: &str) -> Result<RecordPosition, PipelineError> {
        let bytes = identity.as_bytes();
        match self.log.append(&self.topic, bytes, bytes).await {
            Ok(position) => {
                record_publish("success");
                debug!(
                    target: "provisioner.publisher",
                    identity_hash = %hash_for_correlation(identity),
                    partition = position.partition,
                    offset = position.offset,
                    "Published signup event"
                );
                Ok(position)
            }
            Err(e) => {
                record_publish("error");
                Err(PipelineError::from(e))
            }
        }
    }

    /// Publish, logging and swallowing any failure.
    pub async fn publish_best_effort(&self, identity: &str) -> Option<RecordPosition> {
        match self.publish(identity).await {
            Ok(position) => Some(position),
            Err(e) => {
                warn!(
                    target: "provisioner.publisher",
                    identity_hash = %hash_for_correlation(identity),
                    error = %e,
                    "Failed to publish signup event; signup continues without a provisioned token"
                );
                None
            }
        }
    }
}
