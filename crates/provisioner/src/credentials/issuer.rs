use super::{SessionClaims, SigningSecret, SESSION_ALGORITHM};
use crate::errors::PipelineError;
use crate::models::{Credential, UserId};
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use jsonwebtoken::{encode, EncodingKey, Header};
use std::time::Duration;
use tracing::instrument;

/// Sign a session credential for `subject`, valid from `now` for `lifetime`.
///
/// Timestamps are whole seconds; `expires_at` is `now` truncated to the
/// second plus `lifetime`. Issuing twice is always safe: each call yields an
/// independently valid token.
///
/// # Errors
///
/// `Fatal` if the lifetime cannot be represented or signing fails. Neither is
/// retried.
#[instrument(skip_all)]
pub fn issue_credential(
    subject: UserId,
    secret: &SigningSecret,
    lifetime: Duration,
    now: DateTime<Utc>,
) -> Result<Credential, PipelineError> {
    let lifetime_secs = i64::try_from(lifetime.as_secs())
        .map_err(|_| PipelineError::Fatal("token lifetime out of range".to_string()))?;
    let issued_at_secs = now.timestamp();
    let expires_at_secs = issued_at_secs
        .checked_add(lifetime_secs)
        .ok_or_else(|| PipelineError::Fatal("token expiry out of range".to_string()))?;

    let issued_at = DateTime::from_timestamp(issued_at_secs, 0)
        .ok_or_else(|| PipelineError::Fatal("issue time out of range".to_string()))?;
    let expires_at = DateTime::from_timestamp(expires_at_secs, 0)
        .ok_or_else(|| PipelineError::Fatal("token expiry out of range".to_string()))?;

    let claims = SessionClaims {
        sub: subject.to_string(),
        exp: expires_at_secs,
        iat: issued_at_secs,
    };

    let mut header = Header::new(SESSION_ALGORITHM);
    header.typ = Some("JWT".to_string());

    let token = encode(&header, &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| PipelineError::Fatal(format!("JWT signing operation failed: {e}")))?;

    Ok(Credential {
        subject,
        issued_token: SecretString::from(token),
        issued_at,
        expires_at,
    })
}

/// [`issue_credential`] bound to a configured secret and lifetime.
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    secret: SigningSecret,
    lifetime: Duration,
}

impl CredentialIssuer {
    pub fn new(secret: SigningSecret, lifetime: Duration) -> Self {
        Self { secret, lifetime }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn issue(&self, subject: UserId, now: DateTime<Utc>) -> Result<Credential, PipelineError> {
        issue_credential(subject, &self.secret, self.lifetime, now)
    }
}
