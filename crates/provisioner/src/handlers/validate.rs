use crate::middleware::AuthenticatedUser;
use crate::models::UserId;
use axum::{Extension, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    /// Token subject.
    pub sub: UserId,
    /// Identity of the authenticated user.
    pub data: String,
}

/// `GET /api/v1/auth/validate`
///
/// Runs behind `require_auth`; reaching the handler means the token is valid.
pub async fn validate_session(Extension(user): Extension<AuthenticatedUser>) -> Json<ValidateResponse> {
    Json(ValidateResponse {
        sub: user.user_id,
        data: user.email,
    })
}
