//! Fixed test identities, secrets and timestamps.
//!
//! Everything here is deterministic so test results are reproducible.

use chrono::{DateTime, TimeZone, Utc};
use common::secret::SecretString;
use provisioner::credentials::SigningSecret;

// Identities
pub const TEST_IDENTITY_ALICE: &str = "a@x.com";
pub const TEST_IDENTITY_BOB: &str = "b@x.com";
/// Never inserted into any store.
pub const TEST_IDENTITY_GHOST: &str = "ghost@x.com";

// Log layout
pub const TEST_TOPIC: &str = "user-signup";
pub const TEST_GROUP_ID: &str = "login-consumer-group";
pub const TEST_OTHER_GROUP_ID: &str = "audit-consumer-group";

// Secrets
pub const TEST_SECRET: &str = "test-signing-secret-do-not-use-in-production";
pub const TEST_OTHER_SECRET: &str = "a-different-test-signing-secret";

/// Default session lifetime, 72 hours.
pub const TEST_TOKEN_LIFETIME_SECS: u64 = 72 * 60 * 60;

/// 2025-01-01T00:00:00Z. Whole seconds, like issued `exp` claims.
pub fn test_now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_735_689_600, 0)
        .single()
        .expect("fixed timestamp is valid")
}

/// [`SigningSecret`] over [`TEST_SECRET`].
pub fn test_signing_secret() -> SigningSecret {
    signing_secret(TEST_SECRET)
}

pub fn signing_secret(secret: &str) -> SigningSecret {
    SigningSecret::new(SecretString::from(secret)).expect("test secret is not empty")
}
