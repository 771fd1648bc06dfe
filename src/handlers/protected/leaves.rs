// handlers/protected/leaves.rs - Leave requests and their review

use axum::{extract::Path, Extension, Json};
use uuid::Uuid;

use crate::database::models::{Leave, LeaveStatus};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::leave_service::{LeaveDecision, LeaveEntry, LeaveRequest};
use crate::services::LeaveService;

/// POST /api/leaves
pub async fn leave_post(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<LeaveRequest>,
) -> ApiResult<Leave> {
    let student = auth.require_student()?;
    Ok(ApiResponse::created(LeaveService::new()?.apply(student, body).await?))
}

/// GET /api/leaves/my
pub async fn my_leaves(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Leave>> {
    let student = auth.require_student()?;
    Ok(ApiResponse::success(LeaveService::new()?.mine(student.id).await?))
}

async fn by_status(auth: &AuthUser, status: LeaveStatus) -> ApiResult<Vec<LeaveEntry>> {
    let reviewer = auth.require_advisor()?;
    Ok(ApiResponse::success(LeaveService::new()?.by_status(reviewer, status).await?))
}

pub async fn pending(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<LeaveEntry>> {
    by_status(&auth, LeaveStatus::Pending).await
}

pub async fn approved(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<LeaveEntry>> {
    by_status(&auth, LeaveStatus::Approved).await
}

pub async fn rejected(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<LeaveEntry>> {
    by_status(&auth, LeaveStatus::Rejected).await
}

/// PUT /api/leaves/:id
pub async fn leave_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(decision): Json<LeaveDecision>,
) -> ApiResult<Leave> {
    let reviewer = auth.require_advisor()?;
    Ok(ApiResponse::success(LeaveService::new()?.decide(reviewer, id, decision).await?))
}
