// handlers/protected/reports.rs - Attendance reports (staff)

use axum::{
    extract::Query,
    http::header,
    response::{IntoResponse, Response},
    Extension,
};
use serde_json::Value;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::report_service::{DailyQuery, ReportQuery, SummaryReport};
use crate::services::ReportService;

pub async fn summary_get(
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<SummaryReport> {
    auth.require_staff()?;
    Ok(ApiResponse::success(ReportService::new()?.summary(&query).await?))
}

pub async fn daily_get(
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<DailyQuery>,
) -> ApiResult<Value> {
    auth.require_staff()?;
    Ok(ApiResponse::success(ReportService::new()?.daily(&query).await?))
}

/// GET /api/reports/export/csv - served as a download, not in the envelope
pub async fn export_csv_get(
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    auth.require_staff()?;
    let (filename, body) = ReportService::new()?.export_csv(&query).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        body,
    )
        .into_response())
}
