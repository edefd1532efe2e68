//! Common utilities shared across the provisioning workspace.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for unverified JWT inspection (size limits, header `alg`, claims segment)
pub mod jwt;
