//! Session credentials: HMAC-signed JWTs issued to users after signup and
//! checked on every access-gated request.
//!
//! Both directions are pure functions of `(token or subject, secret, now)`;
//! the only collaborator is the user store used by [`TokenValidator`] to
//! resolve a verified subject to a live user.

mod issuer;
mod validator;

pub use issuer::{issue_credential, CredentialIssuer};
pub use validator::{validate_token, AuthFailure, TokenValidator, ValidatedToken};

use crate::errors::PipelineError;
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The only algorithm tokens are signed with or accepted under.
pub const SESSION_ALGORITHM: Algorithm = Algorithm::HS256;

/// Header value of [`SESSION_ALGORITHM`].
pub const SESSION_ALGORITHM_NAME: &str = "HS256";

/// Claim set of a session token.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id, decimal.
    pub sub: String,
    pub exp: i64,
    /// Absent on tokens minted before `iat` was added.
    #[serde(default)]
    pub iat: i64,
}

/// Custom Debug implementation that redacts the `sub` field.
impl fmt::Debug for SessionClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClaims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

/// HMAC key material. Never empty.
#[derive(Clone)]
pub struct SigningSecret(SecretString);

impl SigningSecret {
    /// # Errors
    ///
    /// `Fatal` when the secret is empty.
    pub fn new(secret: SecretString) -> Result<Self, PipelineError> {
        if secret.expose_secret().is_empty() {
            return Err(PipelineError::Fatal(
                "signing secret must not be empty".to_string(),
            ));
        }
        Ok(Self(secret))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.expose_secret().as_bytes()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret([REDACTED])")
    }
}
