use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    LeaveStatus {
        Pending => "Pending",
        Approved => "Approved",
        Rejected => "Rejected",
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Leave {
    pub id: Uuid,
    pub student_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub attachment: Option<String>,
    pub status: LeaveStatus,
    pub approved_by: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
