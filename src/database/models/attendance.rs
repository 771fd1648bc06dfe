use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

pub const DEFAULT_PERIOD: &str = "General";

text_enum! {
    AttendanceStatus {
        Present => "Present",
        Absent => "Absent",
        Leave => "Leave",
        HalfDay => "Half Day",
    }
}

impl AttendanceStatus {
    /// Counts toward presence totals.
    pub fn counts_present(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::HalfDay)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub id: Uuid,
    pub student_id: Uuid,
    pub date: NaiveDate,
    pub time: DateTime<Utc>,
    pub period: String,
    pub status: AttendanceStatus,
    pub captured_photo: Option<String>,
    pub liveness_score: Option<f64>,
    pub verified: bool,
    pub marked_by: Option<Uuid>,
    pub is_manual: bool,
    pub session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_day_round_trips_with_space() {
        assert_eq!(AttendanceStatus::HalfDay.as_str(), "Half Day");
        assert_eq!("Half Day".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::HalfDay);
        let parsed: AttendanceStatus = serde_json::from_str("\"Half Day\"").unwrap();
        assert_eq!(parsed, AttendanceStatus::HalfDay);
    }

    #[test]
    fn presence_counting() {
        assert!(AttendanceStatus::Present.counts_present());
        assert!(AttendanceStatus::HalfDay.counts_present());
        assert!(!AttendanceStatus::Leave.counts_present());
        assert!(!AttendanceStatus::Absent.counts_present());
    }
}
