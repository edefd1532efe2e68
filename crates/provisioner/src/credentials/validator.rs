use super::{SessionClaims, SigningSecret, SESSION_ALGORITHM, SESSION_ALGORITHM_NAME};
use crate::errors::PipelineError;
use crate::models::{User, UserId};
use crate::observability::metrics::record_token_validation;
use crate::repositories::UserStore;
use chrono::{DateTime, Utc};
use common::jwt::{decode_segment_json, extract_alg, split_token, JwtValidationError};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, DecodingKey, Validation};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

/// Why a presented token was refused.
///
/// Kept for logs and metrics only; callers see a uniform unauthorized result.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("malformed token")]
    MalformedToken,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("token expired")]
    Expired,

    #[error("unknown signing algorithm")]
    UnknownAlgorithm,

    #[error("subject no longer exists")]
    UserNotFound,
}

impl AuthFailure {
    /// Stable label for metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            AuthFailure::MalformedToken => "malformed_token",
            AuthFailure::SignatureMismatch => "signature_mismatch",
            AuthFailure::Expired => "expired",
            AuthFailure::UnknownAlgorithm => "unknown_algorithm",
            AuthFailure::UserNotFound => "user_not_found",
        }
    }
}

/// Verified content of a session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedToken {
    pub subject: UserId,
    pub expires_at: DateTime<Utc>,
}

/// Verify `token` against `secret` at instant `now`.
///
/// Checks run cheapest first: size and structure, then the header algorithm
/// (anything but HS256 is refused before a key is used), then the claims
/// segment, then the signature, then expiry. A token is expired when
/// `now > exp`.
#[instrument(skip_all)]
pub fn validate_token(
    token: &str,
    secret: &SigningSecret,
    now: DateTime<Utc>,
) -> Result<ValidatedToken, AuthFailure> {
    let alg = extract_alg(token).map_err(|e| match e {
        JwtValidationError::TokenTooLarge
        | JwtValidationError::MalformedToken
        | JwtValidationError::MissingAlg => AuthFailure::MalformedToken,
    })?;
    if alg != SESSION_ALGORITHM_NAME {
        debug!(target: "provisioner.credentials", alg = %alg, "Token rejected: unexpected algorithm");
        return Err(AuthFailure::UnknownAlgorithm);
    }

    // Undecodable claims are a structural problem, not a signature problem
    let parts = split_token(token).map_err(|_| AuthFailure::MalformedToken)?;
    decode_segment_json(parts.payload).map_err(|_| AuthFailure::MalformedToken)?;

    let mut validation = Validation::new(SESSION_ALGORITHM);
    validation.validate_exp = false;
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let token_data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        debug!(target: "provisioner.credentials", error = %e, "Token verification failed");
        match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::Base64(_) => AuthFailure::SignatureMismatch,
            ErrorKind::InvalidAlgorithm => AuthFailure::UnknownAlgorithm,
            _ => AuthFailure::MalformedToken,
        }
    })?;

    let subject = token_data
        .claims
        .sub
        .parse::<i64>()
        .map(UserId)
        .map_err(|_| AuthFailure::MalformedToken)?;
    let expires_at =
        DateTime::from_timestamp(token_data.claims.exp, 0).ok_or(AuthFailure::MalformedToken)?;

    if now > expires_at {
        return Err(AuthFailure::Expired);
    }

    Ok(ValidatedToken {
        subject,
        expires_at,
    })
}

/// Token validation plus resolution of the subject to a live user.
#[derive(Clone)]
pub struct TokenValidator {
    secret: SigningSecret,
    users: Arc<dyn UserStore>,
}

impl TokenValidator {
    pub fn new(secret: SigningSecret, users: Arc<dyn UserStore>) -> Self {
        Self { secret, users }
    }

    /// # Errors
    ///
    /// `Invalid(reason)` for any token-level failure or a vanished subject;
    /// store errors pass through unchanged.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Result<User, PipelineError> {
        let validated = match validate_token(token, &self.secret, now) {
            Ok(validated) => validated,
            Err(reason) => {
                record_token_validation("error", Some(reason.as_str()));
                return Err(PipelineError::Invalid(reason));
            }
        };

        match self.users.find_by_id(validated.subject).await? {
            Some(user) => {
                record_token_validation("success", None);
                Ok(user)
            }
            None => {
                debug!(
                    target: "provisioner.credentials",
                    user_id = %validated.subject,
                    "Token subject no longer exists"
                );
                record_token_validation("error", Some(AuthFailure::UserNotFound.as_str()));
                Err(PipelineError::Invalid(AuthFailure::UserNotFound))
            }
        }
    }
}
