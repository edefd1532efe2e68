use crate::errors::PipelineError;
use crate::routes::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SignupEventRequest {
    pub identity: String,
}

#[derive(Debug, Serialize)]
pub struct SignupEventResponse {
    pub partition: i32,
    pub offset: i64,
}

/// Handle a signup notification from the account service
///
/// POST /internal/v1/signups
///
/// Appends one signup event to the log. Unlike the best-effort path used
/// inside signup handlers, a failed append is reported to the caller.
pub async fn publish_signup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignupEventRequest>,
) -> Result<(StatusCode, Json<SignupEventResponse>), PipelineError> {
    let identity = payload.identity.trim();
    if identity.is_empty() {
        return Err(PipelineError::BadRequest(
            "identity must not be empty".to_string(),
        ));
    }

    let position = state.publisher.publish(identity).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SignupEventResponse {
            partition: position.partition,
            offset: position.offset,
        }),
    ))
}
