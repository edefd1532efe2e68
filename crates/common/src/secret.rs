//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the signing secret and for
//! issued session tokens. `SecretString` implements `Debug` with redaction,
//! so any struct deriving `Debug` that holds one is safe to log, and the
//! value is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct SigningConfig {
//!     topic: String,
//!     jwt_secret: SecretString,  // Debug shows "[REDACTED]"
//! }
//!
//! let config = SigningConfig {
//!     topic: "user-signup".to_string(),
//!     jwt_secret: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{config:?}").contains("hunter2"));
//!
//! // Access requires an explicit call
//! let key_bytes: &[u8] = config.jwt_secret.expose_secret().as_bytes();
//! # assert_eq!(key_bytes, b"hunter2");
//! ```
//!
//! # Usage Guidelines
//!
//! Use `SecretString` for:
//! - The HMAC signing secret
//! - Issued session tokens held in memory
//! - Database URLs carrying passwords

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
