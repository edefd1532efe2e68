//! Unverified JWT inspection shared by issuers and validators.
//!
//! This module provides the structural checks that run BEFORE any signature
//! work:
//! - Size limits for DoS prevention
//! - Splitting a compact token into its three segments
//! - Reading the `alg` header so callers can reject algorithm confusion
//! - Decoding the claims segment as JSON
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing here verifies a signature; results are only used to choose how
//!   (or whether) to verify
//! - Error messages are generic; details are logged at debug level
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{extract_alg, MAX_JWT_SIZE_BYTES};
//!
//! let alg = extract_alg(token)?;
//! if alg != "HS256" {
//!     return Err(Reject::UnknownAlgorithm);
//! }
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations.
///
/// # Rationale
///
/// - A session credential (HS256, `sub`/`iat`/`exp`) is ~150 bytes
/// - 8KB leaves room for future claims while bounding decode work
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during unverified JWT inspection.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token header has no usable `alg` field.
    #[error("The access token is invalid or expired")]
    MissingAlg,
}

// =============================================================================
// Token Structure
// =============================================================================

/// The three dot-separated segments of a compact JWT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenParts<'a> {
    /// Base64url-encoded header.
    pub header: &'a str,
    /// Base64url-encoded claims.
    pub payload: &'a str,
    /// Base64url-encoded signature.
    pub signature: &'a str,
}

/// Split a compact JWT into header, payload and signature segments.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Token does not have exactly three non-empty header/payload segments
pub fn split_token(token: &str) -> Result<TokenParts<'_>, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    if header.is_empty() || payload.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty JWT segment");
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(TokenParts {
        header,
        payload,
        signature,
    })
}

/// Decode one base64url JWT segment as a JSON value.
///
/// # Errors
///
/// Returns `MalformedToken` if the segment is not base64url or not JSON.
pub fn decode_segment_json(segment: &str) -> Result<serde_json::Value, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT segment JSON");
        JwtValidationError::MalformedToken
    })
}

/// Extract the `alg` header value from a JWT without verifying the signature.
///
/// Callers compare the result against the single algorithm they are
/// configured for, so that a token claiming `none` or an asymmetric
/// algorithm is rejected before a key is ever chosen.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds size limit
/// - `MalformedToken` - Token structure, header base64 or header JSON invalid
/// - `MissingAlg` - Header has no string `alg` field
pub fn extract_alg(token: &str) -> Result<String, JwtValidationError> {
    let parts = split_token(token)?;
    let header = decode_segment_json(parts.header)?;

    // Reject empty values as well as absent ones
    header
        .get("alg")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingAlg)
}
