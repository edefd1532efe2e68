//! # Provisioner Test Utilities
//!
//! Shared test utilities for the provisioner.
//!
//! This crate provides:
//! - Fixed test identities, secrets and timestamps
//! - Session token builders (including forged and tampered tokens)
//! - A fault-injecting [`EventLog`](provisioner::log::EventLog) wrapper
//! - A pipeline harness running a real consumer against an in-memory log
//! - Custom assertions (`SessionTokenAssertions` trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use provisioner_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = PipelineHarness::start(HarnessOptions::default()).await.unwrap();
//!     let user_id = harness.users.insert_user(TEST_IDENTITY_ALICE).unwrap();
//!
//!     harness.publisher.publish(TEST_IDENTITY_ALICE).await.unwrap();
//!     assert!(harness.wait_for_commits(1).await);
//!
//!     let token = harness.users.user(user_id).unwrap().jwt_token.unwrap();
//!     token.assert_session_token(TEST_SECRET).assert_for_user(user_id);
//!
//!     harness.stop().await.unwrap();
//! }
//! ```

pub mod assertions;
pub mod fault_log;
pub mod pipeline_harness;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use fault_log::*;
pub use pipeline_harness::*;
pub use test_ids::*;
pub use token_builders::*;
