// handlers/protected/auth.rs - The caller's own account

use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::user_service::{profile_view, ProfileUpdate};
use crate::services::UserService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

/// GET /api/auth/profile
pub async fn profile_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    Ok(ApiResponse::success(profile_view(&auth.user)))
}

/// PUT /api/auth/profile
pub async fn profile_put(
    Extension(auth): Extension<AuthUser>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Value> {
    let user = UserService::new()?.update_own_profile(&auth.user, &update).await?;
    Ok(ApiResponse::success(profile_view(&user)))
}

/// PUT /api/auth/password - signs the caller out everywhere on success
pub async fn password_put(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<PasswordChange>,
) -> ApiResult<Value> {
    let Some(current) = body.current_password.filter(|p| !p.is_empty()) else {
        return Err(ApiError::field("currentPassword", "Current password is required"));
    };
    let new = body.new_password.unwrap_or_default();

    UserService::new()?.change_password(auth.id(), &current, &new).await?;
    Ok(ApiResponse::success(json!({
        "message": "Password updated successfully. Please log in again."
    })))
}
