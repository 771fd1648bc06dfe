pub mod attendance_service;
pub mod leave_service;
pub mod qr_service;
pub mod report_service;
pub mod seed;
pub mod session_service;
pub mod staff_service;
pub mod student_service;
pub mod sweeper;
pub mod user_service;
pub mod zone_service;

use axum::http::StatusCode;
use chrono::NaiveDate;
use serde_json::Value;

use crate::auth::AuthError;
use crate::database::DatabaseError;
use crate::error::ApiError;
use crate::types::{campus_today, ClassRef};
use crate::verification::{LivenessFailure, QrRejection};

pub use attendance_service::AttendanceService;
pub use leave_service::LeaveService;
pub use qr_service::QrService;
pub use report_service::ReportService;
pub use session_service::SessionService;
pub use staff_service::StaffService;
pub use student_service::StudentService;
pub use user_service::UserService;
pub use zone_service::ZoneService;

/// Business-rule failures shared by the services
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{field}: {problem}")]
    Field { field: &'static str, problem: String },
    #[error("{message}")]
    Detailed {
        status: StatusCode,
        message: String,
        details: Value,
    },
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Liveness(#[from] LivenessFailure),
    #[error(transparent)]
    Qr(#[from] QrRejection),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ServiceError::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ServiceError::Invalid(message.into())
    }

    pub fn required(field: &'static str) -> Self {
        ServiceError::Field {
            field,
            problem: "This field is required".to_string(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => ApiError::not_found(msg),
            ServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            ServiceError::Conflict(msg) => ApiError::conflict(msg),
            ServiceError::Invalid(msg) => ApiError::bad_request(msg),
            ServiceError::Field { field, problem } => ApiError::field(field, problem),
            ServiceError::Detailed { status, message, details } => {
                ApiError::detailed(status, message, details)
            }
            ServiceError::Database(e) => e.into(),
            ServiceError::Sqlx(e) => e.into(),
            ServiceError::Auth(e) => e.into(),
            ServiceError::Liveness(e) => e.into(),
            ServiceError::Qr(e) => e.into(),
            ServiceError::Csv(e) => e.into(),
        }
    }
}

/// Trims a text input, treating blank as absent.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

pub(crate) fn require_text(value: Option<&str>, field: &'static str) -> ServiceResult<String> {
    non_blank(value).ok_or(ServiceError::required(field))
}

/// A calendar day from `YYYY-MM-DD` (a trailing time part is ignored),
/// defaulting to the campus day today.
pub(crate) fn parse_day(value: Option<&str>) -> ServiceResult<NaiveDate> {
    match non_blank(value) {
        None => Ok(campus_today()),
        Some(raw) => {
            let day = raw.split('T').next().unwrap_or(&raw);
            NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .map_err(|_| ServiceError::invalid(format!("Invalid date '{}'", raw)))
        }
    }
}

/// Optional department / year / section narrowing of a student listing.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ClassFilter {
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
}

impl ClassFilter {
    pub fn department(&self) -> Option<String> {
        non_blank(self.department.as_deref())
    }

    pub fn year(&self) -> Option<String> {
        non_blank(self.year.as_deref())
    }

    pub fn section(&self) -> Option<String> {
        non_blank(self.section.as_deref())
    }
}

impl From<ClassRef> for ClassFilter {
    fn from(class: ClassRef) -> Self {
        Self {
            department: Some(class.department),
            year: Some(class.year),
            section: class.section,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_http_status() {
        assert_eq!(ApiError::from(ServiceError::not_found("x")).status_code(), 404);
        assert_eq!(ApiError::from(ServiceError::forbidden("x")).status_code(), 403);
        assert_eq!(ApiError::from(ServiceError::conflict("x")).status_code(), 409);
        assert_eq!(ApiError::from(ServiceError::required("reason")).status_code(), 400);
        assert_eq!(ApiError::from(ServiceError::from(QrRejection::Expired)).status_code(), 400);
        assert_eq!(ApiError::from(ServiceError::from(AuthError::InvalidCredentials)).status_code(), 401);
    }

    #[test]
    fn export_failures_are_server_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::WriteZero, "disk full");
        let err = ApiError::from(ServiceError::from(csv::Error::from(io)));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.message(), "Failed to build export");
    }

    #[test]
    fn blank_text_is_missing() {
        assert_eq!(non_blank(Some("  CS ")), Some("CS".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert!(require_text(None, "department").is_err());
    }

    #[test]
    fn parses_days() {
        assert_eq!(parse_day(Some("2024-03-05")).unwrap(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(
            parse_day(Some("2024-03-05T10:00:00.000Z")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
        assert_eq!(parse_day(None).unwrap(), campus_today());
        assert!(parse_day(Some("05/03/2024")).is_err());
    }
}
