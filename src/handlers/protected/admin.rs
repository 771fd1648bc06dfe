// handlers/protected/admin.rs - Student administration by staff
//
// Route prefix: /api/admin/*
// Faculty advisors see their own class; other staff see every student.

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::student_service::{
    permission_message, NewStudent, PendingPhotoRequest, Promotion, StudentSummary, StudentUpdate,
};
use crate::services::user_service::profile_view;
use crate::services::{ClassFilter, ReportService, StudentService};
use crate::verification::face::FaceDescriptor;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PhotoPermission {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRegistration {
    pub face_descriptor: Option<FaceDescriptor>,
    pub profile_photo: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PhotoDecision {
    pub approve: bool,
}

pub async fn students_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Value>> {
    let staff = auth.require_staff()?;
    let students = StudentService::new()?.list(staff).await?;
    Ok(ApiResponse::success(students.iter().map(profile_view).collect()))
}

/// POST /api/admin/students - initial password is the DOB as DD-MM-YYYY
pub async fn students_post(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<NewStudent>,
) -> ApiResult<Value> {
    let staff = auth.require_staff()?;
    let student = StudentService::new()?.add(body).await?;
    tracing::info!("Student {} added by {}", student.login_id(), staff.name);
    Ok(ApiResponse::created(profile_view(&student)))
}

pub async fn student_get(Extension(auth): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    auth.require_staff()?;
    let student = StudentService::new()?.get_student(id).await?;
    Ok(ApiResponse::success(profile_view(&student)))
}

pub async fn student_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<StudentUpdate>,
) -> ApiResult<Value> {
    auth.require_staff()?;
    let student = StudentService::new()?.update(id, body).await?;
    Ok(ApiResponse::success(profile_view(&student)))
}

pub async fn student_delete(Extension(auth): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    let staff = auth.require_staff()?;
    StudentService::new()?.delete(id).await?;
    tracing::info!("Student {} removed by {}", id, staff.name);
    Ok(ApiResponse::success(json!({ "message": "Student removed" })))
}

/// GET /api/admin/students/search?query=
pub async fn search_get(
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<StudentSummary>> {
    auth.require_staff()?;
    let found = StudentService::new()?
        .search(query.query.as_deref().unwrap_or_default())
        .await?;
    Ok(ApiResponse::success(found))
}

pub async fn promote_post(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<Promotion>,
) -> ApiResult<Value> {
    auth.require_hod_or_above()?;
    let from = body.from_year.clone().unwrap_or_default();
    let to = body.to_year.clone().unwrap_or_default();
    let promoted = StudentService::new()?.promote(body).await?;
    Ok(ApiResponse::success(json!({
        "message": format!("Promoted {} students from {} to {}", promoted, from, to),
        "promoted": promoted,
    })))
}

pub async fn reset_password_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Value> {
    auth.require_staff()?;
    let password = StudentService::new()?.reset_password(id).await?;
    Ok(ApiResponse::success(json!({
        "message": format!("Password reset to DOB ({})", password),
    })))
}

pub async fn toggle_edit_put(Extension(auth): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    auth.require_staff()?;
    let student = StudentService::new()?.toggle_edit_permission(id).await?;
    Ok(ApiResponse::success(permission_message(
        "Edit",
        student.can_edit_profile,
        &student.name,
    )))
}

pub async fn toggle_photo_put(Extension(auth): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    auth.require_staff()?;
    let student = StudentService::new()?.toggle_photo_permission(id).await?;
    Ok(ApiResponse::success(permission_message(
        "Photo update",
        student.can_update_photo,
        &student.name,
    )))
}

/// PUT /api/admin/students/photo-permission - every student at once
pub async fn photo_permission_all_put(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<PhotoPermission>,
) -> ApiResult<Value> {
    auth.require_staff()?;
    let changed = StudentService::new()?.set_photo_permission_all(body.enabled).await?;
    Ok(ApiResponse::success(json!({
        "message": format!(
            "Photo update permission {} for all students",
            if body.enabled { "enabled" } else { "disabled" }
        ),
        "modifiedCount": changed,
    })))
}

/// PUT /api/admin/students/:id/face
pub async fn register_face_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<FaceRegistration>,
) -> ApiResult<Value> {
    auth.require_staff()?;
    let descriptor = body.face_descriptor.unwrap_or_default();
    let student = StudentService::new()?
        .register_face(id, descriptor, body.profile_photo)
        .await?;
    Ok(ApiResponse::success(json!({
        "message": "Face registered successfully",
        "student": profile_view(&student),
    })))
}

pub async fn photo_requests_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<PendingPhotoRequest>> {
    auth.require_staff()?;
    Ok(ApiResponse::success(StudentService::new()?.pending_photos().await?))
}

pub async fn photo_request_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<PhotoDecision>,
) -> ApiResult<Value> {
    auth.require_staff()?;
    let student = StudentService::new()?.decide_photo(id, body.approve).await?;
    Ok(ApiResponse::success(json!({
        "message": if body.approve { "Photo update approved" } else { "Photo update rejected" },
        "student": profile_view(&student),
    })))
}

/// GET /api/admin/myclass
pub async fn my_class_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Value>> {
    let advisor = auth.require_advisor()?;
    let students = StudentService::new()?.my_class(advisor).await?;
    Ok(ApiResponse::success(students.iter().map(profile_view).collect()))
}

/// GET /api/admin/myclass/stats
pub async fn my_class_stats_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    let advisor = auth.require_advisor()?;
    Ok(ApiResponse::success(ReportService::new()?.my_class_stats(advisor).await?))
}

/// GET /api/admin/class-filters?department=&year=
pub async fn class_filters_get(
    Extension(auth): Extension<AuthUser>,
    Query(filter): Query<ClassFilter>,
) -> ApiResult<Value> {
    auth.require_staff()?;
    Ok(ApiResponse::success(ReportService::new()?.cascade_filters(&filter).await?))
}

pub async fn advanced_stats_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    auth.require_staff()?;
    Ok(ApiResponse::success(ReportService::new()?.advanced_stats().await?))
}
