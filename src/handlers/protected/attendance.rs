// handlers/protected/attendance.rs - Marking and reading attendance

use axum::{extract::Query, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::{Attendance, AttendanceStatus};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::attendance_service::{
    AttendanceEntry, CheckInEvidence, ClassFilters, ClassMark, ManualMark, MyAttendance, StudentRow,
};
use crate::services::{AttendanceService, ClassFilter};

#[derive(Debug, Default, Deserialize)]
pub struct ClassDayQuery {
    #[serde(flatten)]
    pub class: ClassFilter,
    pub date: Option<String>,
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub attendance_id: Option<Uuid>,
    pub status: Option<AttendanceStatus>,
}

/// POST /api/attendance/mark - face check-in against the class's open session
pub async fn mark_post(
    Extension(auth): Extension<AuthUser>,
    Json(evidence): Json<CheckInEvidence>,
) -> ApiResult<Value> {
    let student = auth.require_student()?;
    let record = AttendanceService::new()?.mark(student, evidence).await?;
    Ok(ApiResponse::created(json!({
        "message": format!("Attendance marked for {}", record.period),
        "attendance": record,
    })))
}

/// POST /api/attendance/manual
pub async fn manual_post(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<ManualMark>,
) -> ApiResult<Attendance> {
    let staff = auth.require_staff()?;
    Ok(ApiResponse::success(AttendanceService::new()?.manual(staff, body).await?))
}

/// PUT /api/attendance/update-status
pub async fn update_status_put(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<StatusChange>,
) -> ApiResult<Attendance> {
    let staff = auth.require_staff()?;
    let record = AttendanceService::new()?
        .update_status(staff, body.attendance_id, body.status)
        .await?;
    Ok(ApiResponse::success(record))
}

pub async fn my_get(Extension(auth): Extension<AuthUser>) -> ApiResult<MyAttendance> {
    Ok(ApiResponse::success(AttendanceService::new()?.history(auth.id()).await?))
}

pub async fn students_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<StudentRow>> {
    auth.require_staff()?;
    Ok(ApiResponse::success(AttendanceService::new()?.students().await?))
}

pub async fn report_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<AttendanceEntry>> {
    auth.require_staff()?;
    Ok(ApiResponse::success(AttendanceService::new()?.report().await?))
}

pub async fn class_students_get(
    Extension(auth): Extension<AuthUser>,
    Query(filter): Query<ClassFilter>,
) -> ApiResult<Vec<StudentRow>> {
    auth.require_staff()?;
    Ok(ApiResponse::success(AttendanceService::new()?.class_students(&filter).await?))
}

pub async fn class_status_get(
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ClassDayQuery>,
) -> ApiResult<Vec<Value>> {
    auth.require_staff()?;
    let rows = AttendanceService::new()?
        .class_status(&query.class, query.date.as_deref(), query.period.as_deref())
        .await?;
    Ok(ApiResponse::success(rows))
}

/// POST /api/attendance/class/mark - bulk upsert for one period
pub async fn class_mark_post(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<ClassMark>,
) -> ApiResult<Value> {
    let staff = auth.require_staff()?;
    Ok(ApiResponse::success(AttendanceService::new()?.class_mark(staff, body).await?))
}

pub async fn class_filters_get(Extension(auth): Extension<AuthUser>) -> ApiResult<ClassFilters> {
    auth.require_staff()?;
    Ok(ApiResponse::success(AttendanceService::new()?.class_filters().await?))
}

/// GET /api/attendance/fa/absentees
pub async fn fa_absentees_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Value>> {
    let advisor = auth.require_advisor()?;
    Ok(ApiResponse::success(AttendanceService::new()?.fa_absentees(advisor).await?))
}

/// GET /api/attendance/period-wise
pub async fn period_wise_get(
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ClassDayQuery>,
) -> ApiResult<Value> {
    let staff = auth.require_staff()?;
    let matrix = AttendanceService::new()?
        .period_wise(staff, &query.class, query.date.as_deref())
        .await?;
    Ok(ApiResponse::success(matrix))
}
