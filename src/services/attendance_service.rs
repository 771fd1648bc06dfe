use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::user_service::UserService;
use super::{non_blank, parse_day, ClassFilter, ServiceError, ServiceResult};
use crate::config::config;
use crate::database::models::{
    Attendance, AttendanceSession, AttendanceStatus, Role, User, DEFAULT_PERIOD,
};
use crate::database::{DatabaseError, DatabaseManager};
use crate::events::{hub, EventKind, Room};
use crate::types::{campus_day, campus_offset};
use crate::verification::face::{self, FaceDescriptor};
use crate::verification::liveness::{self, ChallengeResponse, DetectionSummary};
use crate::verification::{GeoPoint, LivenessEvidence, LivenessPolicy};

/// Evidence a student submits with a self check-in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInEvidence {
    pub face_descriptor: Option<FaceDescriptor>,
    pub captured_photo: Option<String>,
    pub location: Option<GeoPoint>,
    pub liveness_score: Option<f64>,
    pub liveness: Option<ChallengeResponse>,
    pub detection: Option<DetectionSummary>,
}

impl CheckInEvidence {
    pub fn liveness_evidence(&self) -> LivenessEvidence {
        LivenessEvidence {
            challenge: self.liveness.clone(),
            score: self.liveness_score,
            detection: self.detection.clone(),
        }
    }

    /// The descriptor, if one with values was supplied.
    pub fn face(&self) -> Option<&FaceDescriptor> {
        self.face_descriptor.as_ref().filter(|d| !d.is_empty())
    }
}

/// The period a self check-in fills. Without an open session the check-in
/// stands for the whole day and is refused once any record exists that day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CheckInSlot {
    pub period: String,
    pub whole_day: bool,
}

impl CheckInSlot {
    pub fn for_session(session: Option<&AttendanceSession>) -> Self {
        match session {
            Some(s) => Self { period: s.period.clone(), whole_day: false },
            None => Self { period: DEFAULT_PERIOD.to_string(), whole_day: true },
        }
    }

    fn already_marked(&self) -> ServiceError {
        if self.whole_day {
            ServiceError::conflict("Attendance already marked for today")
        } else {
            ServiceError::conflict(format!("Attendance already marked for {}", self.period))
        }
    }
}

/// Compares a live descriptor with the stored one.
pub(crate) fn match_face(student: &User, candidate: &FaceDescriptor, threshold: f64) -> ServiceResult<f64> {
    if !student.has_face() {
        return Err(ServiceError::invalid("Face not registered. Contact Admin."));
    }
    let result = face::verify(candidate.as_slice(), &student.face_embedding, threshold);
    tracing::debug!("Face match distance for {}: {:.4}", student.id, result.distance);
    if !result.matched {
        return Err(ServiceError::Detailed {
            status: StatusCode::BAD_REQUEST,
            message: "Face not matched".to_string(),
            details: json!({ "distance": result.distance, "threshold": threshold }),
        });
    }
    Ok(result.distance)
}

/// Checks the caller's position against the session's fence, if it has one.
pub(crate) fn check_geofence(
    session: &AttendanceSession,
    location: Option<GeoPoint>,
    tolerance: f64,
) -> ServiceResult<()> {
    let Some(fence) = session.geofence() else {
        return Ok(());
    };
    let point = location
        .filter(GeoPoint::is_valid)
        .ok_or_else(|| ServiceError::invalid("Location permission required to mark attendance."))?;

    let check = fence.check(point, tolerance);
    if check.within {
        return Ok(());
    }
    Err(ServiceError::Detailed {
        status: StatusCode::BAD_REQUEST,
        message: check.rejection_message(),
        details: json!({
            "details": {
                "yourDistance": check.distance_m.round(),
                "maxAllowed": check.allowed_m.round(),
                "radius": fence.radius_m,
                "sessionLocation": fence.center,
                "yourLocation": point,
            }
        }),
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualMark {
    pub student_id: Option<Uuid>,
    pub date: Option<String>,
    pub status: Option<AttendanceStatus>,
    pub period: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMark {
    pub date: Option<String>,
    pub period: Option<String>,
    pub attendance_list: Option<Vec<ClassMarkItem>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMarkItem {
    pub student_id: Uuid,
    pub status: AttendanceStatus,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMarkSummary {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub half_day: usize,
    pub leave: usize,
}

impl ClassMarkSummary {
    pub fn of(items: &[ClassMarkItem]) -> Self {
        let count = |s: AttendanceStatus| items.iter().filter(|i| i.status == s).count();
        Self {
            total: items.len(),
            present: items.iter().filter(|i| i.status.counts_present()).count(),
            absent: count(AttendanceStatus::Absent),
            half_day: count(AttendanceStatus::HalfDay),
            leave: count(AttendanceStatus::Leave),
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMarkResults {
    pub success: usize,
    pub updated: usize,
    pub errors: Vec<Value>,
}

/// Attendance history plus presence totals.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyAttendance {
    pub logs: Vec<Attendance>,
    /// Distinct days with a Present or Half Day record.
    pub total_present: usize,
    pub total_periods_present: usize,
}

impl MyAttendance {
    pub fn from_logs(logs: Vec<Attendance>) -> Self {
        let present: Vec<&Attendance> = logs.iter().filter(|a| a.status.counts_present()).collect();
        let days: HashSet<NaiveDate> = present.iter().map(|a| a.date).collect();
        Self {
            total_present: days.len(),
            total_periods_present: present.len(),
            logs,
        }
    }
}

/// An attendance record with the names around it.
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub attendance: Attendance,
    pub student_name: String,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub profile_photo: Option<String>,
    pub marked_by_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: Uuid,
    pub name: String,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    pub profile_photo: Option<String>,
    pub phone: Option<String>,
    pub parent_phone: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DayRecord {
    student_id: Uuid,
    period: String,
    status: AttendanceStatus,
    time: DateTime<Utc>,
}

/// department → year → sections, plus the flat lists.
#[derive(Debug, Default, Serialize)]
pub struct ClassFilters {
    pub departments: Vec<String>,
    pub years: Vec<String>,
    pub sections: Vec<String>,
    pub hierarchy: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl ClassFilters {
    pub fn from_rows(rows: &[(Option<String>, Option<String>, Option<String>)]) -> Self {
        let mut filters = ClassFilters::default();
        let mut years = BTreeSet::new();
        let mut sections = BTreeSet::new();

        for (department, year, section) in rows {
            if let Some(y) = year {
                years.insert(y.clone());
            }
            if let Some(s) = section {
                sections.insert(s.clone());
            }
            let Some(department) = department else { continue };
            let by_year = filters.hierarchy.entry(department.clone()).or_default();
            if let Some(y) = year {
                let secs = by_year.entry(y.clone()).or_default();
                if let Some(s) = section {
                    secs.insert(s.clone());
                }
            }
        }

        filters.departments = filters.hierarchy.keys().cloned().collect();
        filters.years = years.into_iter().collect();
        filters.sections = sections.into_iter().collect();
        filters
    }
}

/// Builds the students × periods grid for one day.
pub fn period_matrix(day: NaiveDate, students: &[StudentRow], records: &[(Uuid, String, AttendanceStatus, DateTime<Utc>)]) -> Value {
    let periods: BTreeSet<&str> = records.iter().map(|(_, p, _, _)| p.as_str()).collect();
    let mut by_student: HashMap<Uuid, HashMap<&str, (AttendanceStatus, DateTime<Utc>)>> = HashMap::new();
    for (student, period, status, time) in records {
        by_student
            .entry(*student)
            .or_default()
            .insert(period.as_str(), (*status, *time));
    }

    let mut class_summary: BTreeMap<&str, (usize, usize, usize)> =
        periods.iter().map(|p| (*p, (0, 0, 0))).collect();

    let rows: Vec<Value> = students
        .iter()
        .map(|s| {
            let marks = by_student.get(&s.id);
            let mut cells = serde_json::Map::new();
            let (mut present, mut absent) = (0, 0);
            for period in &periods {
                let tally = class_summary.entry(*period).or_default();
                match marks.and_then(|m| m.get(period)) {
                    Some((status, time)) => {
                        match status {
                            AttendanceStatus::Present => {
                                present += 1;
                                tally.0 += 1;
                            }
                            AttendanceStatus::Absent => {
                                absent += 1;
                                tally.1 += 1;
                            }
                            _ => {}
                        }
                        cells.insert(period.to_string(), json!({ "status": status, "time": time }));
                    }
                    None => {
                        tally.2 += 1;
                        cells.insert(period.to_string(), json!({ "status": "Not Marked", "time": null }));
                    }
                }
            }
            json!({
                "id": s.id,
                "name": s.name,
                "rollNumber": s.roll_number,
                "profilePhoto": s.profile_photo,
                "periods": cells,
                "summary": { "present": present, "absent": absent, "total": periods.len() },
            })
        })
        .collect();

    let class_summary: serde_json::Map<String, Value> = class_summary
        .into_iter()
        .map(|(p, (present, absent, not_marked))| {
            (
                p.to_string(),
                json!({
                    "present": present,
                    "absent": absent,
                    "notMarked": not_marked,
                    "total": students.len(),
                }),
            )
        })
        .collect();

    json!({
        "date": day,
        "students": rows,
        "periods": periods,
        "classSummary": class_summary,
    })
}

const STUDENT_ROW_COLUMNS: &str =
    "id, name, roll_number, department, year, section, profile_photo, phone, parent_phone";

pub struct AttendanceService {
    pool: PgPool,
}

impl AttendanceService {
    pub fn new() -> Result<Self, DatabaseError> {
        Ok(Self::with_pool(DatabaseManager::pool()?))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The open session of a student's class, if any.
    pub async fn open_session_for(&self, student: &User) -> ServiceResult<Option<AttendanceSession>> {
        let Some(class) = student.student_class() else {
            return Ok(None);
        };
        Ok(sqlx::query_as::<_, AttendanceSession>(
            "SELECT * FROM attendance_sessions
             WHERE department = $1 AND year = $2
               AND (section IS NULL OR section = $3)
               AND status = 'active' AND end_time > NOW()
             ORDER BY start_time DESC
             LIMIT 1",
        )
        .bind(&class.department)
        .bind(&class.year)
        .bind(&class.section)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Face check-in (`POST /api/attendance/mark`).
    pub async fn mark(&self, student: &User, evidence: CheckInEvidence) -> ServiceResult<Attendance> {
        let settings = &config().attendance;
        let descriptor = evidence
            .face()
            .ok_or_else(|| ServiceError::invalid("Face descriptor required"))?;

        let liveness_score = LivenessPolicy::from_config()
            .evaluate(
                liveness::registry(),
                student.id,
                &evidence.liveness_evidence(),
                Utc::now(),
            )
            .await?;

        match_face(student, descriptor, settings.face_match_threshold)?;

        let session = self.open_session_for(student).await?;
        if let Some(session) = &session {
            check_geofence(session, evidence.location, settings.geofence_tolerance)?;
        }

        self.record_check_in(student, session.as_ref(), evidence.captured_photo, liveness_score)
            .await
    }

    /// Inserts a verified Present record and notifies staff and the student.
    pub(crate) async fn record_check_in(
        &self,
        student: &User,
        session: Option<&AttendanceSession>,
        captured_photo: Option<String>,
        liveness_score: Option<f64>,
    ) -> ServiceResult<Attendance> {
        let now = Utc::now();
        let day = campus_day(now, campus_offset());
        let slot = CheckInSlot::for_session(session);
        let period = slot.period.as_str();

        let inserted = sqlx::query_as::<_, Attendance>(
            "INSERT INTO attendance
                (id, student_id, date, time, period, status, captured_photo, liveness_score,
                 verified, is_manual, session_id)
             SELECT $1, $2, $3, $4, $5, 'Present', $6, $7, TRUE, FALSE, $8
             WHERE NOT ($9 AND EXISTS (SELECT 1 FROM attendance WHERE student_id = $2 AND date = $3))
             ON CONFLICT (student_id, date, period) DO NOTHING
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(student.id)
        .bind(day)
        .bind(now)
        .bind(period)
        .bind(captured_photo)
        .bind(liveness_score)
        .bind(session.map(|s| s.id))
        .bind(slot.whole_day)
        .fetch_optional(&self.pool)
        .await?;

        let attendance = inserted.ok_or_else(|| slot.already_marked())?;

        tracing::info!("{} checked in for {} on {}", student.login_id(), period, day);

        let events = hub();
        events.publish(
            Room::Staff,
            EventKind::AttendanceUpdate,
            json!({
                "studentId": student.id,
                "studentName": student.name,
                "sessionId": session.map(|s| s.id),
                "period": period,
                "status": attendance.status,
                "time": attendance.time,
            }),
        );
        events.publish(
            Room::Student(student.id),
            EventKind::AttendanceMarked,
            json!({ "attendanceId": attendance.id, "period": period, "status": attendance.status }),
        );
        Ok(attendance)
    }

    /// Staff upsert for one student on one day.
    pub async fn manual(&self, staff: &User, mark: ManualMark) -> ServiceResult<Attendance> {
        let (Some(student_id), Some(date), Some(status)) = (mark.student_id, mark.date.as_deref(), mark.status)
        else {
            return Err(ServiceError::invalid("Student ID, date, and status are required"));
        };
        let day = parse_day(Some(date))?;
        let period = non_blank(mark.period.as_deref()).unwrap_or_else(|| DEFAULT_PERIOD.to_string());

        let student = UserService::with_pool(self.pool.clone())
            .find_by_id(student_id)
            .await?
            .filter(|u| u.role == Role::Student)
            .ok_or_else(|| ServiceError::not_found("Student not found"))?;

        let record = self.upsert_mark(staff.id, student.id, day, &period, status).await?;
        tracing::info!(
            "{} marked {} as {} for {} on {}",
            staff.name,
            student.login_id(),
            status,
            period,
            day
        );
        Ok(record.0)
    }

    /// Returns the record and whether it already existed.
    async fn upsert_mark(
        &self,
        staff_id: Uuid,
        student_id: Uuid,
        day: NaiveDate,
        period: &str,
        status: AttendanceStatus,
    ) -> Result<(Attendance, bool), sqlx::Error> {
        let row: (Uuid, bool) = sqlx::query_as(
            "INSERT INTO attendance
                (id, student_id, date, time, period, status, marked_by, is_manual, verified)
             VALUES ($1, $2, $3, NOW(), $4, $5, $6, TRUE, TRUE)
             ON CONFLICT (student_id, date, period)
             DO UPDATE SET status = EXCLUDED.status, marked_by = EXCLUDED.marked_by, is_manual = TRUE
             RETURNING id, (xmax::text <> '0') AS existed",
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(day)
        .bind(period)
        .bind(status)
        .bind(staff_id)
        .fetch_one(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, Attendance>("SELECT * FROM attendance WHERE id = $1")
            .bind(row.0)
            .fetch_one(&self.pool)
            .await?;
        Ok((record, row.1))
    }

    /// Only the staff member who marked a record may change it.
    pub async fn update_status(
        &self,
        staff: &User,
        attendance_id: Option<Uuid>,
        status: Option<AttendanceStatus>,
    ) -> ServiceResult<Attendance> {
        let (Some(id), Some(status)) = (attendance_id, status) else {
            return Err(ServiceError::invalid("Attendance ID and status are required"));
        };
        if status == AttendanceStatus::Leave {
            return Err(ServiceError::invalid("Invalid status"));
        }

        let record = sqlx::query_as::<_, Attendance>("SELECT * FROM attendance WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Attendance record not found"))?;

        if record.marked_by != Some(staff.id) {
            return Err(ServiceError::forbidden("Not authorized to update this attendance"));
        }

        Ok(sqlx::query_as::<_, Attendance>(
            "UPDATE attendance SET status = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn history(&self, student_id: Uuid) -> ServiceResult<MyAttendance> {
        let logs = sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE student_id = $1 ORDER BY date DESC, time DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(MyAttendance::from_logs(logs))
    }

    pub async fn students(&self) -> ServiceResult<Vec<StudentRow>> {
        self.class_students(&ClassFilter::default()).await
    }

    pub async fn report(&self) -> ServiceResult<Vec<AttendanceEntry>> {
        Ok(sqlx::query_as::<_, AttendanceEntry>(
            "SELECT a.*, s.name AS student_name, s.roll_number, s.department, s.profile_photo,
                    m.name AS marked_by_name
             FROM attendance a
             JOIN users s ON s.id = a.student_id
             LEFT JOIN users m ON m.id = a.marked_by
             ORDER BY a.date DESC, a.time DESC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn class_students(&self, filter: &ClassFilter) -> ServiceResult<Vec<StudentRow>> {
        Ok(sqlx::query_as::<_, StudentRow>(&format!(
            "SELECT {} FROM users
             WHERE role = 'student'
               AND ($1::text IS NULL OR department = $1)
               AND ($2::text IS NULL OR year = $2)
               AND ($3::text IS NULL OR section = $3)
             ORDER BY roll_number",
            STUDENT_ROW_COLUMNS
        ))
        .bind(filter.department())
        .bind(filter.year())
        .bind(filter.section())
        .fetch_all(&self.pool)
        .await?)
    }

    /// Each student of the filtered class with their status for one day and period.
    pub async fn class_status(
        &self,
        filter: &ClassFilter,
        date: Option<&str>,
        period: Option<&str>,
    ) -> ServiceResult<Vec<Value>> {
        let day = parse_day(date)?;
        let period = non_blank(period).unwrap_or_else(|| DEFAULT_PERIOD.to_string());
        let students = self.class_students(filter).await?;
        let ids: Vec<Uuid> = students.iter().map(|s| s.id).collect();

        let records: Vec<(Uuid, AttendanceStatus)> = sqlx::query_as(
            "SELECT student_id, status FROM attendance
             WHERE student_id = ANY($1) AND date = $2 AND period = $3",
        )
        .bind(&ids)
        .bind(day)
        .bind(&period)
        .fetch_all(&self.pool)
        .await?;
        let statuses: HashMap<Uuid, AttendanceStatus> = records.into_iter().collect();

        Ok(students
            .into_iter()
            .map(|s| {
                let status = statuses
                    .get(&s.id)
                    .map(|st| st.as_str())
                    .unwrap_or("Not Marked");
                json!({
                    "id": s.id,
                    "name": s.name,
                    "rollNumber": s.roll_number,
                    "status": status,
                })
            })
            .collect())
    }

    /// Bulk upsert; per-student failures are reported, not fatal.
    pub async fn class_mark(&self, staff: &User, mark: ClassMark) -> ServiceResult<Value> {
        let (Some(date), Some(period), Some(items)) = (
            mark.date.as_deref(),
            non_blank(mark.period.as_deref()),
            mark.attendance_list,
        ) else {
            return Err(ServiceError::invalid("Date, period, and attendance list are required"));
        };
        let day = parse_day(Some(date))?;

        let mut results = ClassMarkResults::default();
        for item in &items {
            match self.upsert_mark(staff.id, item.student_id, day, &period, item.status).await {
                Ok((_, true)) => results.updated += 1,
                Ok((_, false)) => results.success += 1,
                Err(e) => {
                    tracing::warn!("Class mark failed for {}: {}", item.student_id, e);
                    results.errors.push(json!({ "studentId": item.student_id, "error": e.to_string() }));
                }
            }
        }

        tracing::info!(
            "{} marked {} for {} on {}: {} new, {} updated",
            staff.name,
            items.len(),
            period,
            day,
            results.success,
            results.updated
        );

        Ok(json!({
            "message": format!("Attendance marked. {} new, {} updated.", results.success, results.updated),
            "summary": ClassMarkSummary::of(&items),
            "results": results,
        }))
    }

    pub async fn class_filters(&self) -> ServiceResult<ClassFilters> {
        let rows: Vec<(Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT DISTINCT department, year, section FROM users WHERE role = 'student'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ClassFilters::from_rows(&rows))
    }

    /// Today's absentees of the advisor's class with the periods missed.
    pub async fn fa_absentees(&self, advisor: &User) -> ServiceResult<Vec<Value>> {
        let class = advisor
            .advisor_class()
            .ok_or_else(|| ServiceError::forbidden("Not authorized as Faculty Advisor"))?;
        let students = self.class_students(&ClassFilter::from(class)).await?;
        let ids: Vec<Uuid> = students.iter().map(|s| s.id).collect();

        let absences: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT student_id, period FROM attendance
             WHERE student_id = ANY($1) AND date = $2 AND status = 'Absent'
             ORDER BY period",
        )
        .bind(&ids)
        .bind(campus_day(Utc::now(), campus_offset()))
        .fetch_all(&self.pool)
        .await?;

        let mut periods: HashMap<Uuid, Vec<String>> = HashMap::new();
        for (student, period) in absences {
            periods.entry(student).or_default().push(period);
        }

        Ok(students
            .into_iter()
            .filter_map(|s| {
                let missed = periods.remove(&s.id)?;
                Some(json!({
                    "id": s.id,
                    "name": s.name,
                    "rollNumber": s.roll_number,
                    "phone": s.phone,
                    "parentPhone": s.parent_phone,
                    "profilePhoto": s.profile_photo,
                    "periods": missed,
                    "status": "Absent",
                }))
            })
            .collect())
    }

    /// Students × periods for a day. Only the super-admin sees records
    /// marked by others.
    pub async fn period_wise(&self, caller: &User, filter: &ClassFilter, date: Option<&str>) -> ServiceResult<Value> {
        let day = parse_day(date)?;
        let students = self.class_students(filter).await?;
        if students.is_empty() {
            return Ok(json!({ "date": day, "students": [], "periods": [], "classSummary": {} }));
        }
        let ids: Vec<Uuid> = students.iter().map(|s| s.id).collect();
        let marker = (caller.role != Role::Superadmin).then_some(caller.id);

        let records = sqlx::query_as::<_, DayRecord>(
            "SELECT student_id, period, status, time FROM attendance
             WHERE student_id = ANY($1) AND date = $2
               AND ($3::uuid IS NULL OR marked_by = $3)",
        )
        .bind(&ids)
        .bind(day)
        .bind(marker)
        .fetch_all(&self.pool)
        .await?;

        let records: Vec<_> = records
            .into_iter()
            .map(|r| (r.student_id, r.period, r.status, r.time))
            .collect();
        Ok(period_matrix(day, &students, &records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use crate::types::ClassRef;

    fn record(day: NaiveDate, period: &str, status: AttendanceStatus) -> Attendance {
        Attendance {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            date: day,
            time: Utc::now(),
            period: period.into(),
            status,
            captured_photo: None,
            liveness_score: None,
            verified: true,
            marked_by: None,
            is_manual: false,
            session_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn history_counts_days_and_periods() {
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 11).unwrap();
        let mine = MyAttendance::from_logs(vec![
            record(d1, "P1", AttendanceStatus::Present),
            record(d1, "P2", AttendanceStatus::HalfDay),
            record(d2, "P1", AttendanceStatus::Absent),
            record(d2, "P2", AttendanceStatus::Leave),
        ]);
        assert_eq!(mine.total_present, 1);
        assert_eq!(mine.total_periods_present, 2);
        assert_eq!(mine.logs.len(), 4);
    }

    #[test]
    fn face_match_needs_registered_face() {
        let mut student = fixtures::student("Ravi", "3", ClassRef::new("CS", "1", None));
        let live = FaceDescriptor(vec![0.1, 0.2, 0.3]);
        assert!(matches!(match_face(&student, &live, 0.6), Err(ServiceError::Invalid(_))));

        student.face_embedding = vec![0.1, 0.2, 0.3];
        assert!(match_face(&student, &live, 0.6).is_ok());

        student.face_embedding = vec![0.9, 0.9, 0.9];
        match match_face(&student, &live, 0.6) {
            Err(ServiceError::Detailed { status, details, .. }) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert!(details["distance"].as_f64().unwrap() > 0.6);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn geofence_applies_only_to_located_sessions() {
        let now = Utc::now();
        let mut session = fixtures::session(Uuid::new_v4(), ClassRef::new("CS", "1", None), now);
        assert!(check_geofence(&session, None, 1.2).is_ok());

        session.latitude = Some(12.9716);
        session.longitude = Some(77.5946);
        session.radius_m = 50.0;
        assert!(matches!(check_geofence(&session, None, 1.2), Err(ServiceError::Invalid(_))));

        let near = GeoPoint { latitude: 12.9718, longitude: 77.5946 };
        assert!(check_geofence(&session, Some(near), 1.2).is_ok());

        let far = GeoPoint { latitude: 12.9816, longitude: 77.5946 };
        assert!(matches!(
            check_geofence(&session, Some(far), 1.2),
            Err(ServiceError::Detailed { .. })
        ));
    }

    #[test]
    fn filters_build_hierarchy() {
        let s = |v: &str| Some(v.to_string());
        let filters = ClassFilters::from_rows(&[
            (s("CS"), s("2"), s("B")),
            (s("CS"), s("2"), s("A")),
            (s("CS"), s("1"), None),
            (s("EE"), s("3"), s("A")),
            (None, s("4"), None),
        ]);
        assert_eq!(filters.departments, vec!["CS", "EE"]);
        assert_eq!(filters.years, vec!["1", "2", "3", "4"]);
        assert_eq!(filters.sections, vec!["A", "B"]);
        let cs2: Vec<&String> = filters.hierarchy["CS"]["2"].iter().collect();
        assert_eq!(cs2, vec!["A", "B"]);
        assert!(filters.hierarchy["CS"]["1"].is_empty());
    }

    #[test]
    fn class_mark_summary_counts() {
        let item = |status| ClassMarkItem { student_id: Uuid::new_v4(), status };
        let summary = ClassMarkSummary::of(&[
            item(AttendanceStatus::Present),
            item(AttendanceStatus::HalfDay),
            item(AttendanceStatus::Absent),
            item(AttendanceStatus::Leave),
        ]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.present, 2);
        assert_eq!(summary.half_day, 1);
        assert_eq!(summary.absent, 1);
        assert_eq!(summary.leave, 1);
    }

    #[test]
    fn period_matrix_fills_unmarked_cells() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let student = |name: &str| StudentRow {
            id: Uuid::new_v4(),
            name: name.into(),
            roll_number: None,
            department: None,
            year: None,
            section: None,
            profile_photo: None,
            phone: None,
            parent_phone: None,
        };
        let students = vec![student("A"), student("B")];
        let now = Utc::now();
        let records = vec![
            (students[0].id, "P1".to_string(), AttendanceStatus::Present, now),
            (students[0].id, "P2".to_string(), AttendanceStatus::Absent, now),
            (students[1].id, "P1".to_string(), AttendanceStatus::Absent, now),
        ];
        let grid = period_matrix(day, &students, &records);

        assert_eq!(grid["periods"], json!(["P1", "P2"]));
        assert_eq!(grid["students"][1]["periods"]["P2"]["status"], "Not Marked");
        assert_eq!(grid["students"][0]["summary"]["present"], 1);
        assert_eq!(grid["classSummary"]["P1"]["absent"], 1);
        assert_eq!(grid["classSummary"]["P2"]["notMarked"], 1);
        assert_eq!(grid["classSummary"]["P2"]["total"], 2);
    }

    #[test]
    fn check_in_without_session_claims_the_whole_day() {
        let slot = CheckInSlot::for_session(None);
        assert_eq!(slot.period, DEFAULT_PERIOD);
        assert!(slot.whole_day);
        match slot.already_marked() {
            ServiceError::Conflict(msg) => assert_eq!(msg, "Attendance already marked for today"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn check_in_with_session_claims_its_period() {
        let staff = fixtures::staff("Ravi");
        let session = fixtures::session(staff.id, ClassRef::new("CS", "2", None), Utc::now());
        let slot = CheckInSlot::for_session(Some(&session));
        assert_eq!(slot, CheckInSlot { period: "Period 1".into(), whole_day: false });
        assert!(matches!(slot.already_marked(), ServiceError::Conflict(msg) if msg.ends_with("Period 1")));
    }
}
