use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default session token lifetime (72 hours).
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: u64 = 72 * 60 * 60;

pub const DEFAULT_SIGNUP_TOPIC: &str = "user-signup";
pub const DEFAULT_GROUP_ID: &str = "login-consumer-group";
pub const DEFAULT_BROKERS: &str = "localhost:9092";
pub const DEFAULT_MIN_FETCH_BYTES: usize = 1;
pub const DEFAULT_MAX_FETCH_BYTES: usize = 10_000_000;
pub const DEFAULT_FETCH_MAX_WAIT_MS: u64 = 10_000;
pub const DEFAULT_RETRY_INITIAL_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
pub const DEFAULT_UNHEALTHY_AFTER: u64 = 5;
/// Journal entries written before the first compaction.
pub const DEFAULT_COMPACT_AFTER_ENTRIES: usize = 10_000;
pub const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 60;

/// How the consumer makes progress durable after a record is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Commit the group's read position after every processed record.
    Commit,
    /// Commit, then advance the retention watermark to the lowest position
    /// committed by any group on that partition.
    CommitAndTrim,
}

impl FromStr for CommitPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(CommitPolicy::Commit),
            "commit-and-trim" => Ok(CommitPolicy::CommitAndTrim),
            other => Err(ConfigError::InvalidValue {
                name: "COMMIT_POLICY".to_string(),
                reason: format!("expected 'commit' or 'commit-and-trim', got '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: SecretString,
    pub bind_address: String,
    pub broker_addresses: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub partitions: i32,
    pub log_data_dir: Option<PathBuf>,
    pub compact_after_entries: usize,
    /// Period of the retention task. `None` disables it.
    pub retention_interval: Option<Duration>,
    pub min_fetch_bytes: usize,
    pub max_fetch_bytes: usize,
    pub fetch_max_wait: Duration,
    pub signing_secret: SecretString,
    pub token_lifetime: Duration,
    pub commit_policy: CommitPolicy,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub unhealthy_after_failures: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid broker address '{0}': expected host:port")]
    InvalidBrokerAddress(String),

    #[error("External log brokers are not supported, the log runs in-process: {0}")]
    ExternalBrokers(String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let signing_secret = vars
            .get("JWT_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".to_string()))?;
        if signing_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "JWT_SECRET".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8090".to_string());

        let broker_addresses = parse_brokers(
            vars.get("LOG_BROKERS")
                .map(String::as_str)
                .unwrap_or(DEFAULT_BROKERS),
        )?;
        if broker_addresses.iter().any(|b| b != DEFAULT_BROKERS) {
            return Err(ConfigError::ExternalBrokers(broker_addresses.join(",")));
        }

        let topic = non_empty_or(vars, "SIGNUP_TOPIC", DEFAULT_SIGNUP_TOPIC)?;
        let group_id = non_empty_or(vars, "CONSUMER_GROUP_ID", DEFAULT_GROUP_ID)?;

        let partitions: i32 = parse_or(vars, "LOG_PARTITIONS", 1)?;
        if partitions < 1 {
            return Err(ConfigError::InvalidValue {
                name: "LOG_PARTITIONS".to_string(),
                reason: format!("must be at least 1, got {partitions}"),
            });
        }

        let log_data_dir = vars
            .get("LOG_DATA_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let compact_after_entries: usize = parse_or(
            vars,
            "LOG_COMPACT_AFTER_ENTRIES",
            DEFAULT_COMPACT_AFTER_ENTRIES,
        )?;
        if compact_after_entries == 0 {
            return Err(ConfigError::InvalidValue {
                name: "LOG_COMPACT_AFTER_ENTRIES".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let retention_secs: u64 = parse_or(
            vars,
            "LOG_RETENTION_INTERVAL_SECS",
            DEFAULT_RETENTION_INTERVAL_SECS,
        )?;
        let retention_interval = (retention_secs > 0).then(|| Duration::from_secs(retention_secs));

        let min_fetch_bytes: usize = parse_or(vars, "FETCH_MIN_BYTES", DEFAULT_MIN_FETCH_BYTES)?;
        let max_fetch_bytes: usize = parse_or(vars, "FETCH_MAX_BYTES", DEFAULT_MAX_FETCH_BYTES)?;
        if min_fetch_bytes == 0 || min_fetch_bytes > max_fetch_bytes {
            return Err(ConfigError::InvalidValue {
                name: "FETCH_MIN_BYTES".to_string(),
                reason: format!(
                    "must satisfy 1 <= FETCH_MIN_BYTES <= FETCH_MAX_BYTES, got {min_fetch_bytes} and {max_fetch_bytes}"
                ),
            });
        }

        let fetch_max_wait = Duration::from_millis(parse_or(
            vars,
            "FETCH_MAX_WAIT_MS",
            DEFAULT_FETCH_MAX_WAIT_MS,
        )?);

        let token_lifetime_secs: u64 = parse_or(
            vars,
            "TOKEN_LIFETIME_SECONDS",
            DEFAULT_TOKEN_LIFETIME_SECONDS,
        )?;
        if token_lifetime_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "TOKEN_LIFETIME_SECONDS".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let commit_policy = vars
            .get("COMMIT_POLICY")
            .map(|s| s.parse::<CommitPolicy>())
            .transpose()?
            .unwrap_or(CommitPolicy::Commit);

        let retry_initial_ms: u64 =
            parse_or(vars, "CONSUMER_RETRY_INITIAL_MS", DEFAULT_RETRY_INITIAL_MS)?;
        let retry_max_ms: u64 = parse_or(vars, "CONSUMER_RETRY_MAX_MS", DEFAULT_RETRY_MAX_MS)?;
        if retry_initial_ms == 0 || retry_initial_ms > retry_max_ms {
            return Err(ConfigError::InvalidValue {
                name: "CONSUMER_RETRY_INITIAL_MS".to_string(),
                reason: format!(
                    "must satisfy 0 < initial <= CONSUMER_RETRY_MAX_MS, got {retry_initial_ms} and {retry_max_ms}"
                ),
            });
        }

        let unhealthy_after_failures: u64 =
            parse_or(vars, "CONSUMER_UNHEALTHY_AFTER", DEFAULT_UNHEALTHY_AFTER)?;

        Ok(Config {
            database_url: SecretString::from(database_url.clone()),
            bind_address,
            broker_addresses,
            topic,
            group_id,
            partitions,
            log_data_dir,
            compact_after_entries,
            retention_interval,
            min_fetch_bytes,
            max_fetch_bytes,
            fetch_max_wait,
            signing_secret: SecretString::from(signing_secret.clone()),
            token_lifetime: Duration::from_secs(token_lifetime_secs),
            commit_policy,
            retry_initial_backoff: Duration::from_millis(retry_initial_ms),
            retry_max_backoff: Duration::from_millis(retry_max_ms),
            unhealthy_after_failures,
        })
    }

    /// Database URL for the user store.
    pub fn database_url(&self) -> &str {
        self.database_url.expose_secret()
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn non_empty_or(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<String, ConfigError> {
    match vars.get(name) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must not be empty".to_string(),
        }),
        Some(value) => Ok(value.trim().to_string()),
        None => Ok(default.to_string()),
    }
}

/// Parse a comma-separated `host:port` list.
fn parse_brokers(raw: &str) -> Result<Vec<String>, ConfigError> {
    let brokers: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();

    if brokers.is_empty() {
        return Err(ConfigError::InvalidValue {
            name: "LOG_BROKERS".to_string(),
            reason: "at least one broker address is required".to_string(),
        });
    }

    for broker in &brokers {
        let valid = broker
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid {
            return Err(ConfigError::InvalidBrokerAddress(broker.clone()));
        }
    }

    Ok(brokers)
}
