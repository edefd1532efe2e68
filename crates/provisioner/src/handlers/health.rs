//! Health endpoints.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (is the consumer running and below its
//!   failure threshold?)

use crate::observability::health::ConsumerHealthSnapshot;
use crate::routes::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub topic: String,
    pub group_id: String,
    pub brokers: Vec<String>,
    pub consumer: ConsumerHealthSnapshot,
}

/// Liveness probe handler.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler. 200 when ready, 503 otherwise; the body carries
/// the consumer's state and counters either way.
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let consumer = state.consumer_health.snapshot();
    let (status_code, status) = if consumer.ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        status_code,
        Json(ReadinessResponse {
            status,
            topic: state.topic.clone(),
            group_id: state.group_id.clone(),
            brokers: state.brokers.clone(),
            consumer,
        }),
    )
}
