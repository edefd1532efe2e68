//! Authentication middleware for protected routes.
//!
//! Takes the session token from the `Authorization` cookie (where signup
//! clients store it) or from an `Authorization: Bearer` header, validates it
//! and resolves its subject to a live user. Every failure produces the same
//! 401 response.

use crate::credentials::{AuthFailure, TokenValidator};
use crate::errors::PipelineError;
use crate::models::UserId;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Cookie carrying the session token.
pub const AUTH_COOKIE_NAME: &str = "Authorization";

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub validator: TokenValidator,
}

/// The user a request was authenticated as, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: String,
}

/// Authentication middleware that validates session tokens.
///
/// # Response
///
/// - 401 Unauthorized if the token is missing, invalid, expired or its user is gone
/// - 503 if the user store is unavailable
/// - Otherwise continues with [`AuthenticatedUser`] in extensions
#[instrument(skip_all, name = "provisioner.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, PipelineError> {
    let token = extract_token(req.headers()).ok_or_else(|| {
        tracing::debug!(target: "provisioner.credentials", "Missing session token");
        PipelineError::Invalid(AuthFailure::MalformedToken)
    })?;

    let user = state.validator.authenticate(&token, Utc::now()).await?;

    req.extensions_mut().insert(AuthenticatedUser {
        user_id: user.user_id,
        email: user.email,
    });

    Ok(next.run(req).await)
}

/// Cookie first, then bearer header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string());

    from_cookie.filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}
