// handlers/protected/qr.rs - Rotating QR check-in

use axum::{extract::Path, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::qr_service::{QrIssued, QrScan};
use crate::services::QrService;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrToggle {
    pub requires_face_verification: Option<bool>,
}

/// POST /api/sessions/:id/qr/generate
pub async fn generate_post(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<QrIssued> {
    auth.require_staff()?;
    Ok(ApiResponse::success(QrService::new()?.generate(id).await?))
}

/// GET /api/sessions/:id/qr/status
pub async fn status_get(Extension(auth): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    auth.require_staff()?;
    Ok(ApiResponse::success(QrService::new()?.status(id).await?))
}

/// PUT /api/sessions/:id/qr/toggle
pub async fn toggle_put(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    body: Option<Json<QrToggle>>,
) -> ApiResult<Value> {
    auth.require_staff()?;
    let toggle = body.map(|Json(t)| t).unwrap_or_default();
    Ok(ApiResponse::success(
        QrService::new()?.toggle(id, toggle.requires_face_verification).await?,
    ))
}

/// POST /api/sessions/qr/verify - student check-in by scanned code
pub async fn verify_post(
    Extension(auth): Extension<AuthUser>,
    Json(scan): Json<QrScan>,
) -> ApiResult<Value> {
    let student = auth.require_student()?;
    let record = QrService::new()?.verify_scan(student, scan).await?;
    Ok(ApiResponse::created(json!({
        "message": format!("Attendance marked for {}", record.period),
        "attendance": record,
    })))
}
