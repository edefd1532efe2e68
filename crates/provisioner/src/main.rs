//! Provisioner
//!
//! Runs the signup consumer worker and the retention task, and serves
//! health, metrics, signup publishing and session validation over HTTP.

use provisioner::config::Config;
use provisioner::credentials::{CredentialIssuer, SigningSecret, TokenValidator};
use provisioner::log::{EventLog, LocalLog, LocalLogConfig};
use provisioner::middleware::AuthState;
use provisioner::observability::metrics::init_metrics_recorder;
use provisioner::observability::ConsumerHealth;
use provisioner::repositories::{PgUserStore, UserStore};
use provisioner::routes::{self, AppState};
use provisioner::services::{ConsumerSettings, RetentionTrimmer, SignupConsumer, SignupPublisher};
use provisioner::tasks::start_retention_task;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "provisioner=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting provisioner");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        brokers = ?config.broker_addresses,
        topic = %config.topic,
        group_id = %config.group_id,
        partitions = config.partitions,
        commit_policy = ?config.commit_policy,
        retention_interval_secs = config.retention_interval.map(|i| i.as_secs()),
        token_lifetime_secs = config.token_lifetime.as_secs(),
        "Configuration loaded successfully"
    );

    let secret = SigningSecret::new(config.signing_secret.clone()).map_err(|e| {
        error!("Invalid signing secret: {}", e);
        e
    })?;

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    // Initialize database connection pool with query timeout
    info!("Connecting to database...");
    let db_url_with_timeout = add_query_timeout(config.database_url(), 5);
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url_with_timeout)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    info!("Database connection established");

    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db_pool));

    let log: Arc<dyn EventLog> = Arc::new(
        LocalLog::open(LocalLogConfig {
            topics: vec![config.topic.clone()],
            partitions: config.partitions,
            max_message_bytes: config.max_fetch_bytes,
            data_dir: config.log_data_dir.clone(),
            compact_after_entries: config.compact_after_entries,
        })
        .map_err(|e| {
            error!("Failed to open log: {}", e);
            e
        })?,
    );

    let consumer_health = Arc::new(ConsumerHealth::new(config.unhealthy_after_failures));
    let consumer = SignupConsumer::join(
        Arc::clone(&log),
        Arc::clone(&users),
        CredentialIssuer::new(secret.clone(), config.token_lifetime),
        ConsumerSettings::from_config(&config),
        Arc::clone(&consumer_health),
    )
    .await?;

    let cancel_token = CancellationToken::new();
    let worker = {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            let result = consumer.run(cancel_token.clone()).await;
            // A dead worker takes the process down with it
            if result.is_err() {
                cancel_token.cancel();
            }
            result
        })
    };

    let retention = config.retention_interval.map(|interval| {
        tokio::spawn(start_retention_task(
            RetentionTrimmer::new(Arc::clone(&log), config.topic.clone()),
            interval,
            cancel_token.clone(),
        ))
    });

    let state = Arc::new(AppState {
        consumer_health,
        topic: config.topic.clone(),
        group_id: config.group_id.clone(),
        brokers: config.broker_addresses.clone(),
        publisher: SignupPublisher::new(Arc::clone(&log), config.topic.clone()),
    });
    let auth_state = Arc::new(AuthState {
        validator: TokenValidator::new(secret, users),
    });
    let app = routes::build_routes(state, auth_state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Provisioner listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    // Stop the worker after its in-flight record, then release the log
    cancel_token.cancel();
    let worker_result = worker.await;
    if let Some(retention) = retention {
        if let Err(e) = retention.await {
            error!("Retention task panicked: {}", e);
        }
    }
    log.close().await?;

    match worker_result {
        Ok(Ok(())) => {
            info!("Provisioner shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Signup consumer failed: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("Signup consumer task panicked: {}", e);
            Err(e.into())
        }
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT) or a failed worker.
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
        () = cancel_token.cancelled() => {
            info!("Consumer stopped, shutting down HTTP server...");
        }
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-c%20statement_timeout%3D{timeout_secs}s")
}
