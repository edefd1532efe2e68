//! Signup-driven session credential provisioning.
//!
//! On signup an event is published to a durable partitioned log. A consumer
//! group reads it, signs a session credential for the user, stores it on the
//! user record and only then commits its read position. A separate path
//! validates presented tokens for access-gated requests.
//!
//! # Architecture
//!
//! ```text
//! signup handler -> services/publisher.rs -> log/ (EventLog)
//!     -> services/consumer.rs -> credentials/ -> repositories/ -> commit
//!
//! request -> middleware/auth.rs -> credentials/ -> repositories/
//! ```
//!
//! # Modules
//!
//! - `config` - Configuration from environment
//! - `credentials` - Credential issuer and validator
//! - `errors` - Pipeline error taxonomy with HTTP mapping
//! - `log` - Log client trait, in-process backend, group reader
//! - `services` - Publisher, consumer worker, retention trimmer
//! - `tasks` - Periodic retention
//! - `repositories` - User store
//! - `routes` / `handlers` / `middleware` - Health, metrics, signup publishing
//!   and token validation over HTTP

pub mod config;
pub mod credentials;
pub mod errors;
pub mod handlers;
pub mod log;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
