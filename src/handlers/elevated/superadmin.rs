// handlers/elevated/superadmin.rs - Principal-level administration

use axum::{extract::Path, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::hod::PasswordReset;
use crate::database::models::Role;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::staff_service::{AccountUpdate, AdvisorAssignment, NewHod, NewStaff, StaffScope};
use crate::services::user_service::profile_view;
use crate::services::StaffService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentAssignment {
    pub assigned_department: Option<String>,
}

fn require_superadmin(auth: &AuthUser) -> Result<StaffScope, ApiError> {
    auth.require_role(Role::Superadmin)?;
    Ok(StaffScope::Institution)
}

pub async fn stats_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    require_superadmin(&auth)?;
    Ok(ApiResponse::success(StaffService::new()?.institution_stats().await?))
}

pub async fn staff_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Value>> {
    let scope = require_superadmin(&auth)?;
    Ok(ApiResponse::success(StaffService::new()?.list_staff(&scope).await?))
}

pub async fn staff_post(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<NewStaff>,
) -> ApiResult<Value> {
    let scope = require_superadmin(&auth)?;
    let staff = StaffService::new()?.create_staff(&scope, body).await?;
    Ok(ApiResponse::created(profile_view(&staff)))
}

pub async fn staff_delete(Extension(auth): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    let scope = require_superadmin(&auth)?;
    let staff = StaffService::new()?.delete_staff(&scope, id).await?;
    Ok(ApiResponse::success(json!({ "message": format!("{} removed", staff.name) })))
}

pub async fn staff_reset_password_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<PasswordReset>,
) -> ApiResult<Value> {
    let scope = require_superadmin(&auth)?;
    let staff = StaffService::new()?
        .reset_staff_password(&scope, id, body.new_password.as_deref())
        .await?;
    Ok(ApiResponse::success(json!({
        "message": format!("Password reset for {}", staff.name)
    })))
}

/// PUT /api/superadmin/staff/:id/advisor
pub async fn assign_advisor_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<AdvisorAssignment>,
) -> ApiResult<Value> {
    let scope = require_superadmin(&auth)?;
    let staff = StaffService::new()?.assign_advisor(&scope, id, body).await?;
    Ok(ApiResponse::success(profile_view(&staff)))
}

/// DELETE /api/superadmin/staff/:id/advisor
pub async fn remove_advisor_delete(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Value> {
    let scope = require_superadmin(&auth)?;
    let staff = StaffService::new()?.remove_advisor(&scope, id).await?;
    Ok(ApiResponse::success(json!({
        "message": format!("{} removed as Faculty Advisor", staff.name),
        "staff": profile_view(&staff),
    })))
}

pub async fn hods_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Value>> {
    require_superadmin(&auth)?;
    Ok(ApiResponse::success(StaffService::new()?.list_hods().await?))
}

pub async fn hods_post(Extension(auth): Extension<AuthUser>, Json(body): Json<NewHod>) -> ApiResult<Value> {
    require_superadmin(&auth)?;
    let hod = StaffService::new()?.create_hod(body).await?;
    Ok(ApiResponse::created(profile_view(&hod)))
}

pub async fn hod_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<AccountUpdate>,
) -> ApiResult<Value> {
    require_superadmin(&auth)?;
    let hod = StaffService::new()?.update_hod(id, body).await?;
    Ok(ApiResponse::success(profile_view(&hod)))
}

pub async fn hod_delete(Extension(auth): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    require_superadmin(&auth)?;
    let hod = StaffService::new()?.delete_hod(id).await?;
    Ok(ApiResponse::success(json!({ "message": format!("HOD {} removed", hod.name) })))
}

pub async fn hod_reset_password_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<PasswordReset>,
) -> ApiResult<Value> {
    require_superadmin(&auth)?;
    let hod = StaffService::new()?
        .reset_hod_password(id, body.new_password.as_deref())
        .await?;
    Ok(ApiResponse::success(json!({
        "message": format!("Password reset for {}", hod.name)
    })))
}

pub async fn hod_department_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<DepartmentAssignment>,
) -> ApiResult<Value> {
    require_superadmin(&auth)?;
    let hod = StaffService::new()?
        .assign_department(id, body.assigned_department.as_deref())
        .await?;
    Ok(ApiResponse::success(profile_view(&hod)))
}
