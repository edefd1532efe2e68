//! Domain models for the provisioning pipeline.

use crate::log::LogRecord;
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of a user record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User record (maps to `users` table).
///
/// Only the columns the pipeline reads or writes are mapped; password hashes
/// and profile data belong to the request/response layer.
#[derive(Clone, sqlx::FromRow)]
pub struct User {
    pub user_id: UserId,
    pub email: String,
    /// Most recently issued session token, kept for out-of-band retrieval.
    pub jwt_token: Option<String>,
    pub jwt_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Custom Debug implementation that redacts the stored token.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("user_id", &self.user_id)
            .field("email", &"[REDACTED]")
            .field("jwt_token", &self.jwt_token.as_ref().map(|_| "[REDACTED]"))
            .field("jwt_token_expires_at", &self.jwt_token_expires_at)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// A signed session credential derived from a user id, the signing secret
/// and the issuance instant.
///
/// Always regenerable, so overwriting a stored copy is safe.
#[derive(Debug, Clone)]
pub struct Credential {
    pub subject: UserId,
    pub issued_token: SecretString,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A signup notification as read back from the log.
///
/// Key and value both carry the user's identity (email).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupEvent {
    pub key: String,
    pub value: String,
    pub partition: i32,
    pub offset: i64,
}

impl SignupEvent {
    /// Decode a raw log record. Fails if the value is not valid UTF-8; the
    /// key only routes the record and is decoded lossily.
    pub fn from_record(record: &LogRecord) -> Result<Self, std::str::Utf8Error> {
        Ok(Self {
            key: String::from_utf8_lossy(&record.key).into_owned(),
            value: std::str::from_utf8(&record.value)?.to_string(),
            partition: record.partition,
            offset: record.offset,
        })
    }

    /// The identity the event announces.
    pub fn identity(&self) -> &str {
        &self.value
    }
}
