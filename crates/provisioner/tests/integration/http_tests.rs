//! HTTP surface tests: probes, metrics, signup publishing and the
//! session-gated route.
//!
//! Requests are driven through the real router with `tower::ServiceExt`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use provisioner::credentials::TokenValidator;
use provisioner::log::{EventLog, LocalLog, LocalLogConfig};
use provisioner::middleware::AuthState;
use provisioner::models::UserId;
use provisioner::observability::{ConsumerHealth, ConsumerState};
use provisioner::repositories::users::mock::MockUserStore;
use provisioner::routes::{build_routes, AppState};
use provisioner::services::SignupPublisher;
use provisioner_test_utils::*;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    users: MockUserStore,
    health: Arc<ConsumerHealth>,
    log: Arc<dyn EventLog>,
}

/// Largest key plus value the test log accepts.
const TEST_MAX_MESSAGE_BYTES: usize = 256;

fn test_app() -> TestApp {
    let users = MockUserStore::new();
    let health = Arc::new(ConsumerHealth::new(3));
    let log: Arc<dyn EventLog> = Arc::new(
        LocalLog::open(
            LocalLogConfig::new(TEST_TOPIC).with_max_message_bytes(TEST_MAX_MESSAGE_BYTES),
        )
        .expect("in-memory log opens"),
    );
    let state = Arc::new(AppState {
        consumer_health: Arc::clone(&health),
        topic: TEST_TOPIC.to_string(),
        group_id: TEST_GROUP_ID.to_string(),
        brokers: vec!["localhost:9092".to_string()],
        publisher: SignupPublisher::new(Arc::clone(&log), TEST_TOPIC),
    });
    let auth_state = Arc::new(AuthState {
        validator: TokenValidator::new(test_signing_secret(), Arc::new(users.clone())),
    });
    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

    TestApp {
        router: build_routes(state, auth_state, metrics_handle),
        users,
        health,
        log,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body is readable")
        .to_bytes();
    (status, String::from_utf8(bytes.to_vec()).expect("body is UTF-8"))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

fn post_signup(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/internal/v1/signups")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

fn validate_with_cookie(token: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/v1/auth/validate")
        .header(header::COOKIE, format!("theme=dark; Authorization={token}"))
        .body(Body::empty())
        .expect("valid request")
}

fn validate_with_bearer(token: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/v1/auth/validate")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("valid request")
}

fn fresh_token(user_id: UserId) -> String {
    TestTokenBuilder::new()
        .for_user(user_id)
        .issued_at(Utc::now())
        .build()
}

// ============================================================================
// Probes
// ============================================================================

#[tokio::test]
async fn test_health_returns_ok() {
    let app = test_app();

    let (status, body) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_ready_reflects_consumer_state() -> Result<(), anyhow::Error> {
    let app = test_app();

    // Not yet running
    let (status, body) = send(&app.router, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(json["status"], "not_ready");
    assert_eq!(json["consumer"]["state"], "idle");

    app.health.set_state(ConsumerState::Reading);
    let (status, body) = send(&app.router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(json["status"], "ready");
    assert_eq!(json["topic"], TEST_TOPIC);
    assert_eq!(json["group_id"], TEST_GROUP_ID);

    // Failure threshold reached
    for _ in 0..3 {
        app.health.record_failure();
    }
    let (status, body) = send(&app.router, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(json["consumer"]["consecutive_failures"], 3);
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_responds() {
    let app = test_app();

    let (status, _) = send(&app.router, get("/metrics")).await;

    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Signup publishing
// ============================================================================

#[tokio::test]
async fn test_publish_signup_appends_to_log() -> Result<(), anyhow::Error> {
    let app = test_app();

    let body = serde_json::json!({ "identity": TEST_IDENTITY_ALICE }).to_string();
    let (status, body) = send(&app.router, post_signup(&body)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let json: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(json["partition"], 0);
    assert_eq!(json["offset"], 0);

    assert_eq!(app.log.latest_offset(TEST_TOPIC, 0).await?, 1);
    let request = provisioner::log::FetchRequest {
        topic: TEST_TOPIC.to_string(),
        positions: vec![(0, 0)],
        min_bytes: 1,
        max_bytes: 1_000,
        max_wait: std::time::Duration::from_millis(10),
    };
    let records = app.log.fetch(&request).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, TEST_IDENTITY_ALICE.as_bytes());
    Ok(())
}

#[tokio::test]
async fn test_publish_signup_rejects_blank_identity() -> Result<(), anyhow::Error> {
    let app = test_app();

    let (status, body) = send(&app.router, post_signup(r#"{"identity":"  "}"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(json["error"]["code"], "INVALID_REQUEST");
    assert_eq!(app.log.latest_offset(TEST_TOPIC, 0).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_publish_signup_rejects_oversized_identity() -> Result<(), anyhow::Error> {
    let app = test_app();
    let identity = format!("{}@x.com", "a".repeat(TEST_MAX_MESSAGE_BYTES));

    let body = serde_json::json!({ "identity": identity }).to_string();
    let (status, _) = send(&app.router, post_signup(&body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.log.latest_offset(TEST_TOPIC, 0).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_publish_signup_after_close_is_an_internal_error() -> Result<(), anyhow::Error> {
    let app = test_app();
    app.log.close().await?;

    let body = serde_json::json!({ "identity": TEST_IDENTITY_ALICE }).to_string();
    let (status, _) = send(&app.router, post_signup(&body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}

// ============================================================================
// Session-gated route
// ============================================================================

#[tokio::test]
async fn test_validate_accepts_cookie_token() -> Result<(), anyhow::Error> {
    let app = test_app();
    let user_id = app.users.insert_user(TEST_IDENTITY_ALICE)?;

    let (status, body) = send(&app.router, validate_with_cookie(&fresh_token(user_id))).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(json["data"], TEST_IDENTITY_ALICE);
    assert_eq!(json["sub"], user_id.0);
    Ok(())
}

#[tokio::test]
async fn test_validate_accepts_bearer_token() -> Result<(), anyhow::Error> {
    let app = test_app();
    let user_id = app.users.insert_user(TEST_IDENTITY_ALICE)?;

    let (status, _) = send(&app.router, validate_with_bearer(&fresh_token(user_id))).await;

    assert_eq!(status, StatusCode::OK);
    Ok(())
}

/// Every rejection reason produces the same 401 body.
#[tokio::test]
async fn test_validate_rejections_are_indistinguishable() -> Result<(), anyhow::Error> {
    let app = test_app();
    let user_id = app.users.insert_user(TEST_IDENTITY_ALICE)?;
    let deleted = app.users.insert_user(TEST_IDENTITY_BOB)?;
    let deleted_token = fresh_token(deleted);
    app.users.delete_user(deleted)?;

    let expired = TestTokenBuilder::new()
        .for_user(user_id)
        .issued_at(Utc::now())
        .expires_in(-10)
        .build();
    let requests = [
        get("/api/v1/auth/validate"),
        validate_with_cookie("not-a-token"),
        validate_with_bearer(&flip_signature_bit(&fresh_token(user_id))),
        validate_with_bearer(&expired),
        validate_with_bearer(
            &TestTokenBuilder::new()
                .for_user(user_id)
                .issued_at(Utc::now())
                .with_algorithm("none")
                .build(),
        ),
        validate_with_bearer(&deleted_token),
    ];

    let mut bodies = Vec::new();
    for request in requests {
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        bodies.push(body);
    }

    let json: serde_json::Value = serde_json::from_str(&bodies[0])?;
    assert_eq!(json["error"]["code"], "UNAUTHORIZED");
    assert!(bodies.iter().all(|body| *body == bodies[0]));
    Ok(())
}

#[tokio::test]
async fn test_validate_store_outage_is_unavailable() -> Result<(), anyhow::Error> {
    let app = test_app();
    let user_id = app.users.insert_user(TEST_IDENTITY_ALICE)?;
    app.users.fail_next_lookups(1);

    let (status, _) = send(&app.router, validate_with_bearer(&fresh_token(user_id))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
