//! Observability for the provisioner.
//!
//! # Privacy by Default
//!
//! Instrumented functions use `#[instrument(skip_all)]` and add fields
//! explicitly:
//! - **SAFE**: partition, offset, group, outcome labels, user ids
//! - **HASHED**: user identities (email), via [`hash_for_correlation`]
//! - **NEVER**: signing secret, issued tokens, presented tokens

pub mod health;
pub mod metrics;

pub use health::{ConsumerHealth, ConsumerState};

use sha2::{Digest, Sha256};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars)
///
/// Used for user identities that need correlation across log entries but
/// should not appear in plaintext.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.get(..4).unwrap_or_default())
}
