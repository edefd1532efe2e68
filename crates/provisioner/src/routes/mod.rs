//! HTTP routes for the provisioner.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::middleware::{require_auth, AuthState};
use crate::observability::ConsumerHealth;
use crate::services::SignupPublisher;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub consumer_health: Arc<ConsumerHealth>,
    pub topic: String,
    pub group_id: String,
    /// Configured broker addresses, reported by `/ready`.
    pub brokers: Vec<String>,
    /// Append path for `/internal/v1/signups`.
    pub publisher: SignupPublisher,
}

/// Build the application routes.
///
/// - `/health` - Liveness probe
/// - `/ready` - Readiness probe (consumer state)
/// - `/metrics` - Prometheus metrics
/// - `/internal/v1/signups` - Publish a signup event (internal network only)
/// - `/api/v1/auth/validate` - Session check (authenticated)
pub fn build_routes(
    state: Arc<AppState>,
    auth_state: Arc<AuthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/internal/v1/signups", post(handlers::publish_signup))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/api/v1/auth/validate", get(handlers::validate_session))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
