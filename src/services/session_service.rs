use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::user_service::UserService;
use super::{ServiceError, ServiceResult};
use crate::database::models::{AttendanceSession, User};
use crate::database::{DatabaseError, DatabaseManager};
use crate::events::{hub, EventKind, Room};
use crate::types::{campus_day, campus_offset, normalize_section, ClassRef};

/// Where a session may be checked into from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(alias = "radius")]
    pub radius_m: Option<f64>,
    #[serde(alias = "name")]
    pub location_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    pub period: Option<String>,
    /// Minutes.
    pub duration: Option<i64>,
    pub location: Option<SessionLocation>,
    #[serde(default)]
    pub requires_face_verification: bool,
    #[serde(default)]
    pub force_create: bool,
}

/// A validated session request.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub class: ClassRef,
    pub period: String,
    pub duration: Duration,
    pub location: Option<SessionLocation>,
    pub requires_face_verification: bool,
    pub force: bool,
}

impl CreateSession {
    pub fn validate(self) -> ServiceResult<SessionPlan> {
        let required = || ServiceError::invalid("Department, year, period, and duration are required");
        let department = super::non_blank(self.department.as_deref()).ok_or_else(required)?;
        let year = super::non_blank(self.year.as_deref()).ok_or_else(required)?;
        let period = super::non_blank(self.period.as_deref()).ok_or_else(required)?;
        let minutes = self.duration.filter(|m| *m > 0).ok_or_else(required)?;

        if let Some(loc) = &self.location {
            let point = crate::verification::GeoPoint {
                latitude: loc.latitude,
                longitude: loc.longitude,
            };
            if !point.is_valid() {
                return Err(ServiceError::invalid("Invalid session location"));
            }
        }

        Ok(SessionPlan {
            class: ClassRef::new(department, year, normalize_section(self.section)),
            period,
            duration: Duration::minutes(minutes),
            location: self.location,
            requires_face_verification: self.requires_face_verification,
            force: self.force_create,
        })
    }
}

/// What to do about a running session that collides with a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// The caller's own session; closed without ceremony.
    CloseOwn,
    /// Another staff member's session, replaced by the caller.
    Override,
    /// Report the collision and let the caller decide.
    Report { can_override: bool },
    Denied,
}

pub fn resolve_conflict(existing: &AttendanceSession, caller: &User, force: bool) -> ConflictResolution {
    if existing.staff_id == caller.id {
        return ConflictResolution::CloseOwn;
    }
    let can_override = caller.can_override_sessions();
    match (force, can_override) {
        (false, _) => ConflictResolution::Report { can_override },
        (true, true) => ConflictResolution::Override,
        (true, false) => ConflictResolution::Denied,
    }
}

pub const OVERRIDE_REASON: &str = "Overridden by another staff";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentBrief {
    pub attendance_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub roll_number: Option<String>,
    pub profile_photo: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session: AttendanceSession,
    pub present_count: usize,
    pub absent_count: usize,
    pub present_students: Vec<StudentBrief>,
    pub absent_students: Vec<StudentBrief>,
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    attendance_id: Uuid,
    student_id: Uuid,
    name: String,
    roll_number: Option<String>,
    profile_photo: Option<String>,
    status: String,
}

pub struct SessionService {
    pool: PgPool,
}

impl SessionService {
    pub fn new() -> Result<Self, DatabaseError> {
        Ok(Self::with_pool(DatabaseManager::pool()?))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<AttendanceSession> {
        sqlx::query_as::<_, AttendanceSession>("SELECT * FROM attendance_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Session not found"))
    }

    /// An active, unexpired session whose class collides with `class`.
    pub async fn find_conflict(
        &self,
        class: &ClassRef,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>, sqlx::Error> {
        sqlx::query_as::<_, AttendanceSession>(
            "SELECT * FROM attendance_sessions
             WHERE department = $1 AND year = $2
               AND ($3::text IS NULL OR section IS NULL OR section = $3)
               AND status = 'active' AND end_time > $4
             ORDER BY start_time DESC
             LIMIT 1",
        )
        .bind(&class.department)
        .bind(&class.year)
        .bind(&class.section)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn create(&self, caller: &User, plan: SessionPlan) -> ServiceResult<AttendanceSession> {
        let now = Utc::now();

        if let Some(existing) = self.find_conflict(&plan.class, now).await? {
            match resolve_conflict(&existing, caller, plan.force) {
                ConflictResolution::CloseOwn => {
                    self.close_row(existing.id, now, None, None).await?;
                }
                ConflictResolution::Override => {
                    tracing::info!(
                        "Staff {} overrides session {} of staff {}",
                        caller.id,
                        existing.id,
                        existing.staff_id
                    );
                    self.close_row(existing.id, now, Some(caller.id), Some(OVERRIDE_REASON))
                        .await?;
                }
                ConflictResolution::Report { can_override } => {
                    let owner = UserService::with_pool(self.pool.clone())
                        .find_by_id(existing.staff_id)
                        .await?;
                    return Err(ServiceError::Detailed {
                        status: axum::http::StatusCode::CONFLICT,
                        message: format!("Session already active for {}", plan.class.label()),
                        details: json!({
                            "conflict": true,
                            "existingSession": {
                                "id": existing.id,
                                "period": existing.period,
                                "staffName": owner.map(|u| u.name),
                                "startTime": existing.start_time,
                                "endTime": existing.end_time,
                            },
                            "canOverride": can_override,
                        }),
                    });
                }
                ConflictResolution::Denied => {
                    return Err(ServiceError::forbidden(
                        "Only Faculty Advisors and Admins can override existing sessions",
                    ));
                }
            }
        }

        let radius = plan
            .location
            .as_ref()
            .and_then(|l| l.radius_m)
            .filter(|r| *r > 0.0)
            .unwrap_or(crate::config::config().attendance.default_zone_radius_m);

        let session = sqlx::query_as::<_, AttendanceSession>(
            "INSERT INTO attendance_sessions
                (id, staff_id, department, year, section, period, start_time, end_time, status,
                 latitude, longitude, radius_m, location_name, requires_face_verification)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', $9, $10, $11, $12, $13)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(caller.id)
        .bind(&plan.class.department)
        .bind(&plan.class.year)
        .bind(&plan.class.section)
        .bind(&plan.period)
        .bind(now)
        .bind(now + plan.duration)
        .bind(plan.location.as_ref().map(|l| l.latitude))
        .bind(plan.location.as_ref().map(|l| l.longitude))
        .bind(radius)
        .bind(plan.location.as_ref().and_then(|l| l.location_name.clone()))
        .bind(plan.requires_face_verification)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            "Session {} started for {} ({}) by {}",
            session.id,
            plan.class.label(),
            session.period,
            caller.name
        );

        let events = hub();
        events.publish(
            Room::Class(session.class()),
            EventKind::SessionStarted,
            json!({
                "type": "session_started",
                "message": format!("{} by {} is now open for attendance!", session.period, caller.name),
                "session": {
                    "id": session.id,
                    "period": session.period,
                    "staffName": caller.name,
                    "department": session.department,
                    "year": session.year,
                    "section": session.section,
                    "endTime": session.end_time,
                    "duration": plan.duration.num_minutes(),
                },
            }),
        );
        events.publish(
            Room::Staff,
            EventKind::SessionStarted,
            json!({
                "sessionId": session.id,
                "period": session.period,
                "department": session.department,
                "year": session.year,
                "section": session.section,
            }),
        );

        Ok(session)
    }

    /// Open sessions a student can still check into, newest first.
    pub async fn active_for_student(&self, student: &User) -> ServiceResult<Vec<Value>> {
        let class = student
            .student_class()
            .ok_or_else(|| ServiceError::invalid("Student class is not set"))?;
        let now = Utc::now();
        let today = campus_day(now, campus_offset());

        let sessions = sqlx::query_as::<_, AttendanceSession>(
            "SELECT * FROM attendance_sessions
             WHERE department = $1 AND year = $2
               AND (section IS NULL OR section = $3)
               AND status = 'active' AND end_time > $4
             ORDER BY start_time DESC",
        )
        .bind(&class.department)
        .bind(&class.year)
        .bind(&class.section)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let marked: Vec<(String,)> =
            sqlx::query_as("SELECT period FROM attendance WHERE student_id = $1 AND date = $2")
                .bind(student.id)
                .bind(today)
                .fetch_all(&self.pool)
                .await?;
        let marked: HashSet<String> = marked.into_iter().map(|(p,)| p).collect();

        let users = UserService::with_pool(self.pool.clone());
        let mut out = Vec::new();
        for session in sessions.into_iter().filter(|s| !marked.contains(&s.period)) {
            let staff_name = users.find_by_id(session.staff_id).await?.map(|u| u.name);
            out.push(json!({
                "id": session.id,
                "period": session.period,
                "staffName": staff_name,
                "startTime": session.start_time,
                "endTime": session.end_time,
                "timeRemaining": session.remaining_secs(now),
                "requiresFaceVerification": session.requires_face_verification,
                "qrEnabled": session.qr_enabled,
                "location": session.geofence().map(|g| json!({
                    "latitude": g.center.latitude,
                    "longitude": g.center.longitude,
                    "radius": g.radius_m,
                    "name": session.location_name,
                })),
            }));
        }
        Ok(out)
    }

    pub async fn mine(&self, staff_id: Uuid) -> ServiceResult<Vec<AttendanceSession>> {
        Ok(sqlx::query_as::<_, AttendanceSession>(
            "SELECT * FROM attendance_sessions WHERE staff_id = $1 ORDER BY created_at DESC LIMIT 20",
        )
        .bind(staff_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn mine_active(&self, staff_id: Uuid) -> ServiceResult<Vec<AttendanceSession>> {
        Ok(sqlx::query_as::<_, AttendanceSession>(
            "SELECT * FROM attendance_sessions
             WHERE staff_id = $1 AND status = 'active' AND end_time > NOW()
             ORDER BY start_time DESC",
        )
        .bind(staff_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Present and absent lists for the staff member's last 20 sessions.
    pub async fn my_reports(&self, staff_id: Uuid) -> ServiceResult<Vec<SessionReport>> {
        let sessions = sqlx::query_as::<_, AttendanceSession>(
            "SELECT * FROM attendance_sessions WHERE staff_id = $1 ORDER BY start_time DESC LIMIT 20",
        )
        .bind(staff_id)
        .fetch_all(&self.pool)
        .await?;

        let offset = campus_offset();
        let mut reports = Vec::with_capacity(sessions.len());
        for session in sessions {
            let rows = sqlx::query_as::<_, ReportRow>(
                "SELECT a.id AS attendance_id, u.id AS student_id, u.name, u.roll_number,
                        u.profile_photo, a.status
                 FROM attendance a
                 JOIN users u ON u.id = a.student_id
                 WHERE a.date = $1 AND a.period = $2
                   AND u.department = $3 AND u.year = $4
                   AND ($5::text IS NULL OR u.section = $5)
                 ORDER BY u.roll_number",
            )
            .bind(campus_day(session.start_time, offset))
            .bind(&session.period)
            .bind(&session.department)
            .bind(&session.year)
            .bind(&session.section)
            .fetch_all(&self.pool)
            .await?;

            let (present, absent) = split_report_rows(rows);
            reports.push(SessionReport {
                session,
                present_count: present.len(),
                absent_count: absent.len(),
                present_students: present,
                absent_students: absent,
            });
        }
        Ok(reports)
    }

    /// Owner-only manual close. Absences are recorded first.
    pub async fn close(&self, caller: &User, id: Uuid) -> ServiceResult<(AttendanceSession, u64)> {
        let session = self.get(id).await?;
        if session.staff_id != caller.id {
            return Err(ServiceError::forbidden("Not authorized to close this session"));
        }

        let absentees = self.mark_absences(&session).await?;
        let closed = self.close_row(session.id, Utc::now(), None, None).await?;
        let closed = closed.unwrap_or(session);
        publish_closed(&closed, absentees);
        Ok((closed, absentees))
    }

    /// Sets status closed and end time now; `None` if already closed.
    async fn close_row(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        closed_by: Option<Uuid>,
        reason: Option<&str>,
    ) -> Result<Option<AttendanceSession>, sqlx::Error> {
        sqlx::query_as::<_, AttendanceSession>(
            "UPDATE attendance_sessions
             SET status = 'closed', end_time = LEAST(end_time, $2), closed_by = $3, close_reason = $4
             WHERE id = $1 AND status = 'active'
             RETURNING *",
        )
        .bind(id)
        .bind(now)
        .bind(closed_by)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
    }

    /// Records `Absent` for every student of the session's class with no
    /// record for the session's day and period. Returns how many were added.
    pub async fn mark_absences(&self, session: &AttendanceSession) -> ServiceResult<u64> {
        let day = campus_day(session.start_time, campus_offset());
        let roster = UserService::with_pool(self.pool.clone())
            .class_roster(&session.class())
            .await?;

        let marked: Vec<(Uuid,)> =
            sqlx::query_as("SELECT student_id FROM attendance WHERE date = $1 AND period = $2")
                .bind(day)
                .bind(&session.period)
                .fetch_all(&self.pool)
                .await?;
        let marked: HashSet<Uuid> = marked.into_iter().map(|(id,)| id).collect();

        let absentees: Vec<Uuid> = roster
            .iter()
            .map(|s| s.id)
            .filter(|id| !marked.contains(id))
            .collect();
        if absentees.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = absentees.iter().map(|_| Uuid::new_v4()).collect();

        let result = sqlx::query(
            "INSERT INTO attendance
                (id, student_id, date, time, period, status, marked_by, is_manual, verified, session_id)
             SELECT id, student_id, $3, NOW(), $4, 'Absent', $5, TRUE, TRUE, $6
             FROM UNNEST($1::uuid[], $2::uuid[]) AS t(id, student_id)
             ON CONFLICT (student_id, date, period) DO NOTHING",
        )
        .bind(&ids)
        .bind(&absentees)
        .bind(day)
        .bind(&session.period)
        .bind(session.staff_id)
        .bind(session.id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Auto-marked {} students as absent for {} ({})",
            result.rows_affected(),
            session.period,
            session.class().label()
        );
        Ok(result.rows_affected())
    }

    /// Closes every active session past its end time, recording absences.
    pub async fn close_expired(&self) -> ServiceResult<usize> {
        let expired = sqlx::query_as::<_, AttendanceSession>(
            "SELECT * FROM attendance_sessions WHERE status = 'active' AND end_time <= NOW()",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut closed = 0;
        for session in expired {
            let absentees = self.mark_absences(&session).await?;
            let row = sqlx::query_as::<_, AttendanceSession>(
                "UPDATE attendance_sessions SET status = 'closed'
                 WHERE id = $1 AND status = 'active'
                 RETURNING *",
            )
            .bind(session.id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                publish_closed(&row, absentees);
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::info!("Auto-closed {} expired sessions", closed);
        }
        Ok(closed)
    }
}

fn split_report_rows(rows: Vec<ReportRow>) -> (Vec<StudentBrief>, Vec<StudentBrief>) {
    let mut present = Vec::new();
    let mut absent = Vec::new();
    for row in rows {
        let status = row.status.clone();
        let brief = StudentBrief {
            attendance_id: row.attendance_id,
            id: row.student_id,
            name: row.name,
            roll_number: row.roll_number,
            profile_photo: row.profile_photo,
        };
        match status.as_str() {
            "Present" => present.push(brief),
            "Absent" => absent.push(brief),
            _ => {}
        }
    }
    (present, absent)
}

fn publish_closed(session: &AttendanceSession, absentees: u64) {
    let payload = json!({
        "sessionId": session.id,
        "period": session.period,
        "department": session.department,
        "year": session.year,
        "section": session.section,
        "absentCount": absentees,
    });
    let events = hub();
    events.publish(Room::Class(session.class()), EventKind::SessionClosed, payload.clone());
    events.publish(Room::Staff, EventKind::SessionClosed, payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Role;
    use crate::testing::fixtures;

    fn request() -> CreateSession {
        CreateSession {
            department: Some("CS".into()),
            year: Some("2".into()),
            section: Some(" ".into()),
            period: Some("Period 3".into()),
            duration: Some(10),
            ..CreateSession::default()
        }
    }

    #[test]
    fn validates_required_fields() {
        let plan = request().validate().unwrap();
        assert_eq!(plan.class, ClassRef::new("CS", "2", None));
        assert_eq!(plan.duration, Duration::minutes(10));

        let missing = CreateSession { period: None, ..request() };
        assert!(missing.validate().is_err());

        let zero = CreateSession { duration: Some(0), ..request() };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_location() {
        let bad = CreateSession {
            location: Some(SessionLocation {
                latitude: 123.0,
                longitude: 10.0,
                radius_m: None,
                location_name: None,
            }),
            ..request()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn conflict_resolution_by_caller() {
        let now = Utc::now();
        let owner = fixtures::staff("Owner");
        let existing = fixtures::session(owner.id, ClassRef::new("CS", "2", None), now);

        assert_eq!(resolve_conflict(&existing, &owner, false), ConflictResolution::CloseOwn);

        let plain = fixtures::staff("Other");
        assert_eq!(
            resolve_conflict(&existing, &plain, false),
            ConflictResolution::Report { can_override: false }
        );
        assert_eq!(resolve_conflict(&existing, &plain, true), ConflictResolution::Denied);

        let mut advisor = fixtures::staff("Advisor");
        advisor.is_faculty_advisor = true;
        assert_eq!(resolve_conflict(&existing, &advisor, true), ConflictResolution::Override);

        let mut admin = fixtures::staff("Admin");
        admin.role = Role::Admin;
        assert_eq!(
            resolve_conflict(&existing, &admin, false),
            ConflictResolution::Report { can_override: true }
        );
    }

    #[test]
    fn report_rows_split_by_status() {
        let row = |status: &str| ReportRow {
            attendance_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            name: "S".into(),
            roll_number: None,
            profile_photo: None,
            status: status.into(),
        };
        let (present, absent) = split_report_rows(vec![row("Present"), row("Absent"), row("Leave")]);
        assert_eq!(present.len(), 1);
        assert_eq!(absent.len(), 1);
    }
}
