// handlers/protected/students.rs - Student self-service

use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::student_service::{CompleteProfile, PhotoOutcome, PhotoUpdate};
use crate::services::user_service::{profile_view, ProfileUpdate};
use crate::services::StudentService;

pub async fn profile_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    let student = auth.require_student()?;
    Ok(ApiResponse::success(profile_view(student)))
}

/// PUT /api/students/profile - contact fields only
pub async fn profile_put(
    Extension(auth): Extension<AuthUser>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Value> {
    let student = auth.require_student()?;
    let updated = StudentService::new()?.update_profile(student, &update).await?;
    Ok(ApiResponse::success(json!({
        "message": "Profile updated successfully",
        "user": profile_view(&updated),
    })))
}

/// PUT /api/students/complete-profile - first-time bio data and face
pub async fn complete_profile_put(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<CompleteProfile>,
) -> ApiResult<Value> {
    let student = auth.require_student()?;
    let updated = StudentService::new()?.complete_profile(student, body).await?;
    Ok(ApiResponse::success(json!({
        "message": "Profile completed successfully",
        "user": profile_view(&updated),
    })))
}

/// PUT /api/students/update-photo
pub async fn update_photo_put(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<PhotoUpdate>,
) -> ApiResult<Value> {
    let student = auth.require_student()?;
    let reply = match StudentService::new()?.update_photo(student, body).await? {
        PhotoOutcome::Pending => json!({
            "message": "Photo update request sent to admin for approval",
            "pendingApproval": true,
        }),
        PhotoOutcome::Updated(user) => json!({
            "message": "Photo updated successfully",
            "user": profile_view(&user),
        }),
    };
    Ok(ApiResponse::success(reply))
}
