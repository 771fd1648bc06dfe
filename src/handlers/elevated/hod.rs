// handlers/elevated/hod.rs - A HOD managing their department's staff

use axum::{extract::Path, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::{Role, User};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::staff_service::{AccountUpdate, AdvisorAssignment, NewStaff, StaffScope};
use crate::services::user_service::profile_view;
use crate::services::StaffService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordReset {
    pub new_password: Option<String>,
}

fn hod_scope(auth: &AuthUser) -> Result<(&User, StaffScope), ApiError> {
    let hod = auth.require_role(Role::Hod)?;
    Ok((hod, StaffScope::for_user(hod)?))
}

pub async fn stats_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    let (hod, _) = hod_scope(&auth)?;
    Ok(ApiResponse::success(StaffService::new()?.department_stats(hod).await?))
}

pub async fn staff_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Value>> {
    let (_, scope) = hod_scope(&auth)?;
    Ok(ApiResponse::success(StaffService::new()?.list_staff(&scope).await?))
}

pub async fn staff_post(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<NewStaff>,
) -> ApiResult<Value> {
    let (_, scope) = hod_scope(&auth)?;
    let staff = StaffService::new()?.create_staff(&scope, body).await?;
    Ok(ApiResponse::created(profile_view(&staff)))
}

pub async fn staff_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<AccountUpdate>,
) -> ApiResult<Value> {
    let (_, scope) = hod_scope(&auth)?;
    let staff = StaffService::new()?.update_staff(&scope, id, body).await?;
    Ok(ApiResponse::success(profile_view(&staff)))
}

pub async fn staff_delete(Extension(auth): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    let (_, scope) = hod_scope(&auth)?;
    let staff = StaffService::new()?.delete_staff(&scope, id).await?;
    Ok(ApiResponse::success(json!({ "message": format!("{} removed", staff.name) })))
}

pub async fn staff_reset_password_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<PasswordReset>,
) -> ApiResult<Value> {
    let (_, scope) = hod_scope(&auth)?;
    let staff = StaffService::new()?
        .reset_staff_password(&scope, id, body.new_password.as_deref())
        .await?;
    Ok(ApiResponse::success(json!({
        "message": format!("Password reset for {}", staff.name)
    })))
}

/// PUT /api/hod/staff/:id/assign-class - department is always the HOD's
pub async fn assign_class_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<AdvisorAssignment>,
) -> ApiResult<Value> {
    let (_, scope) = hod_scope(&auth)?;
    let staff = StaffService::new()?.assign_advisor(&scope, id, body).await?;
    let message = match staff.advisor_class() {
        Some(class) => format!("{} assigned as Faculty Advisor for {}", staff.name, class.label()),
        None => format!("{} is no longer a Faculty Advisor", staff.name),
    };
    Ok(ApiResponse::success(json!({ "message": message, "staff": profile_view(&staff) })))
}

pub async fn students_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Value>> {
    let (hod, _) = hod_scope(&auth)?;
    Ok(ApiResponse::success(StaffService::new()?.department_students(hod).await?))
}
