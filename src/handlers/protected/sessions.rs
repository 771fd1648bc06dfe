// handlers/protected/sessions.rs - Attendance sessions

use axum::{extract::Path, Extension, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::AttendanceSession;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::session_service::{CreateSession, SessionReport};
use crate::services::SessionService;

/// POST /api/sessions - may close or override a conflicting session
pub async fn session_post(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<CreateSession>,
) -> ApiResult<AttendanceSession> {
    let staff = auth.require_staff()?;
    let plan = body.validate()?;
    let session = SessionService::new()?.create(staff, plan).await?;
    Ok(ApiResponse::created(session))
}

/// GET /api/sessions/active - open sessions of the student's class
pub async fn active_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Value>> {
    let student = auth.require_student()?;
    Ok(ApiResponse::success(SessionService::new()?.active_for_student(student).await?))
}

pub async fn my_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<AttendanceSession>> {
    let staff = auth.require_staff()?;
    Ok(ApiResponse::success(SessionService::new()?.mine(staff.id).await?))
}

pub async fn my_active_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<AttendanceSession>> {
    let staff = auth.require_staff()?;
    Ok(ApiResponse::success(SessionService::new()?.mine_active(staff.id).await?))
}

pub async fn my_reports_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<SessionReport>> {
    let staff = auth.require_staff()?;
    Ok(ApiResponse::success(SessionService::new()?.my_reports(staff.id).await?))
}

/// PUT /api/sessions/:id/close - marks the rest of the class absent
pub async fn close_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Value> {
    let staff = auth.require_staff()?;
    let (session, absentees) = SessionService::new()?.close(staff, id).await?;
    Ok(ApiResponse::success(json!({
        "message": format!("Session closed. {} students marked absent.", absentees),
        "session": session,
        "absentCount": absentees,
    })))
}
