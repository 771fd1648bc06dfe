// handlers/protected/liveness.rs - POST /api/liveness/challenge

use axum::Extension;
use chrono::Utc;

use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::verification::liveness::{self, Challenge};

/// Issues a gesture sequence the caller must perform before checking in.
pub async fn challenge_post(Extension(auth): Extension<AuthUser>) -> ApiResult<Challenge> {
    let challenge = liveness::registry().issue(auth.id(), Utc::now()).await;
    tracing::debug!("Liveness challenge {} issued to {}", challenge.id, auth.id());
    Ok(ApiResponse::created(challenge))
}
