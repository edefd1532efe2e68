//! Custom test assertions for session tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use provisioner::models::UserId;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: String,
    exp: i64,
    iat: i64,
}

/// Assertions over an issued session token.
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_session_token(TEST_SECRET)
///     .assert_for_user(user_id)
///     .assert_expires_at(now + Duration::hours(72));
/// ```
pub trait SessionTokenAssertions {
    /// Three segments, HS256/JWT header, valid signature under `secret`.
    fn assert_session_token(&self, secret: &str) -> &Self;

    fn assert_for_user(&self, user_id: UserId) -> &Self;

    fn assert_expires_at(&self, at: DateTime<Utc>) -> &Self;

    fn assert_issued_at(&self, at: DateTime<Utc>) -> &Self;
}

fn segment<T: for<'de> Deserialize<'de>>(token: &str, index: usize) -> T {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("token has no segment {index}"));
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("segment {index} is not base64url: {e}"));
    serde_json::from_slice(&bytes).unwrap_or_else(|e| panic!("segment {index} is not JSON: {e}"))
}

impl SessionTokenAssertions for String {
    fn assert_session_token(&self, secret: &str) -> &Self {
        assert_eq!(
            self.split('.').count(),
            3,
            "JWT must have 3 parts (header.payload.signature)"
        );

        let header: JwtHeader = segment(self, 0);
        assert_eq!(header.alg, "HS256", "Expected HS256 algorithm");
        assert_eq!(header.typ.as_deref(), Some("JWT"), "Expected JWT type");

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let verified = decode::<serde_json::Value>(
            self,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        );
        assert!(
            verified.is_ok(),
            "Token signature did not verify: {:?}",
            verified.err()
        );
        self
    }

    fn assert_for_user(&self, user_id: UserId) -> &Self {
        let claims: JwtClaims = segment(self, 1);
        assert_eq!(claims.sub, user_id.0.to_string(), "Unexpected subject");
        self
    }

    fn assert_expires_at(&self, at: DateTime<Utc>) -> &Self {
        let claims: JwtClaims = segment(self, 1);
        assert_eq!(claims.exp, at.timestamp(), "Unexpected expiry");
        self
    }

    fn assert_issued_at(&self, at: DateTime<Utc>) -> &Self {
        let claims: JwtClaims = segment(self, 1);
        assert_eq!(claims.iat, at.timestamp(), "Unexpected issue time");
        self
    }
}
