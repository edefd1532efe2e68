//! Builders for session tokens, valid and otherwise.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use provisioner::models::UserId;
use serde_json::json;
use std::str::FromStr;

use crate::test_ids::{test_now, TEST_SECRET, TEST_TOKEN_LIFETIME_SECS};

/// Builder for session tokens signed (or not) the way a client might present them.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_user(UserId(7))
///     .expires_in(60)
///     .with_algorithm("HS512")
///     .sign(TEST_SECRET);
/// ```
pub struct TestTokenBuilder {
    sub: String,
    iat: i64,
    exp: i64,
    alg: String,
}

impl TestTokenBuilder {
    /// Token for user 1, issued at [`test_now`], valid for 72 hours, HS256.
    pub fn new() -> Self {
        let now = test_now();
        Self {
            sub: "1".to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + TEST_TOKEN_LIFETIME_SECS as i64,
            alg: "HS256".to_string(),
        }
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.sub = user_id.0.to_string();
        self
    }

    /// Raw `sub` claim, for subjects that are not user ids.
    pub fn with_subject(mut self, sub: &str) -> Self {
        self.sub = sub.to_string();
        self
    }

    /// Expire `seconds` after the issue time. Negative values yield a token
    /// that was already expired when issued.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = self.iat + seconds;
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.exp = at.timestamp();
        self
    }

    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        let lifetime = self.exp - self.iat;
        self.iat = at.timestamp();
        self.exp = self.iat + lifetime;
        self
    }

    /// Header `alg`. HMAC names are really signed; anything else (including
    /// `none`) produces a forged token with that header.
    pub fn with_algorithm(mut self, alg: &str) -> Self {
        self.alg = alg.to_string();
        self
    }

    pub fn claims(&self) -> serde_json::Value {
        json!({
            "sub": self.sub,
            "iat": self.iat,
            "exp": self.exp,
        })
    }

    pub fn sign(self, secret: &str) -> String {
        match Algorithm::from_str(&self.alg) {
            Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => encode(
                &Header::new(alg),
                &self.claims(),
                &EncodingKey::from_secret(secret.as_bytes()),
            )
            .expect("HMAC signing never fails"),
            _ => self.forge(),
        }
    }

    /// Sign with [`TEST_SECRET`].
    pub fn build(self) -> String {
        self.sign(TEST_SECRET)
    }

    fn forge(self) -> String {
        let header = json!({ "alg": self.alg, "typ": "JWT" });
        let signature = if self.alg == "none" {
            String::new()
        } else {
            URL_SAFE_NO_PAD.encode(b"forged-signature")
        };
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(self.claims().to_string()),
            signature
        )
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Flip one bit in the first byte of the signature segment.
pub fn flip_signature_bit(token: &str) -> String {
    let (signed, signature) = token.rsplit_once('.').expect("token has a signature segment");
    let mut bytes = URL_SAFE_NO_PAD
        .decode(signature)
        .expect("signature segment is base64url");
    let first = bytes.first_mut().expect("signature is not empty");
    *first ^= 0x01;
    format!("{signed}.{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Replace the payload with `claims`, keeping header and signature.
pub fn replace_payload(token: &str, claims: &serde_json::Value) -> String {
    let parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3, "token must have three segments");
    format!(
        "{}.{}.{}",
        parts[0],
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        parts[2]
    )
}

/// `now` shifted by whole seconds.
pub fn seconds_after(now: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    now + Duration::seconds(seconds)
}
