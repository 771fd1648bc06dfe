use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::attendance_service::{check_geofence, match_face, AttendanceService, CheckInEvidence};
use super::{ServiceError, ServiceResult};
use crate::config::config;
use crate::database::models::{Attendance, AttendanceSession, User};
use crate::database::{DatabaseError, DatabaseManager};
use crate::verification::liveness;
use crate::verification::qr;
use crate::verification::{LivenessPolicy, QrClaim, QrGrant, QrRejection};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrIssued {
    /// The JSON string to render as a QR image.
    pub payload: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_in: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrScan {
    pub qr_data: Option<QrClaim>,
    #[serde(flatten)]
    pub evidence: CheckInEvidence,
}

/// Codes are only issued while the session is active and before its end time.
fn ensure_open(session: &AttendanceSession, now: DateTime<Utc>) -> ServiceResult<()> {
    if !session.is_open(now) {
        return Err(ServiceError::invalid("Session is not active"));
    }
    Ok(())
}

pub struct QrService {
    pool: PgPool,
}

impl QrService {
    pub fn new() -> Result<Self, DatabaseError> {
        Ok(Self { pool: DatabaseManager::pool()? })
    }

    async fn session(&self, id: Uuid) -> ServiceResult<AttendanceSession> {
        sqlx::query_as::<_, AttendanceSession>("SELECT * FROM attendance_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Session not found"))
    }

    /// Rotates the session's token and enables QR check-in.
    pub async fn generate(&self, session_id: Uuid) -> ServiceResult<QrIssued> {
        let session = self.session(session_id).await?;
        ensure_open(&session, Utc::now())?;

        let refresh = config().attendance.qr_refresh_secs;
        let grant = QrGrant::issue(Utc::now(), Duration::seconds(refresh as i64));
        sqlx::query(
            "UPDATE attendance_sessions SET qr_token = $2, qr_expires_at = $3, qr_enabled = TRUE
             WHERE id = $1",
        )
        .bind(session.id)
        .bind(&grant.token)
        .bind(grant.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(QrIssued {
            payload: grant.payload(session.id),
            token: grant.token,
            expires_at: grant.expires_at,
            refresh_in: refresh,
        })
    }

    pub async fn status(&self, session_id: Uuid) -> ServiceResult<Value> {
        let session = self.session(session_id).await?;
        let now = Utc::now();
        let remaining_ms = session
            .qr_expires_at
            .map(|at| (at - now).num_milliseconds())
            .filter(|ms| *ms > 0);
        Ok(json!({
            "qrEnabled": session.qr_enabled,
            "requiresFaceVerification": session.requires_face_verification,
            "qrExpiresAt": session.qr_expires_at,
            "isExpired": remaining_ms.is_none(),
            "timeRemaining": remaining_ms.unwrap_or(0),
        }))
    }

    pub async fn toggle(&self, session_id: Uuid, requires_face: Option<bool>) -> ServiceResult<Value> {
        let session = sqlx::query_as::<_, AttendanceSession>(
            "UPDATE attendance_sessions
             SET qr_enabled = NOT qr_enabled,
                 requires_face_verification = COALESCE($2, requires_face_verification)
             WHERE id = $1
             RETURNING *",
        )
        .bind(session_id)
        .bind(requires_face)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("Session not found"))?;

        Ok(json!({
            "message": format!("QR mode {}", if session.qr_enabled { "enabled" } else { "disabled" }),
            "qrEnabled": session.qr_enabled,
            "requiresFaceVerification": session.requires_face_verification,
        }))
    }

    /// Student QR check-in.
    pub async fn verify_scan(&self, student: &User, scan: QrScan) -> ServiceResult<Attendance> {
        let settings = &config().attendance;
        let claim = scan.qr_data.ok_or(QrRejection::MissingToken)?;
        if claim.token.trim().is_empty() {
            return Err(QrRejection::MissingToken.into());
        }

        let session = sqlx::query_as::<_, AttendanceSession>("SELECT * FROM attendance_sessions WHERE id = $1")
            .bind(claim.session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QrRejection::Invalid)?;

        let now = Utc::now();
        qr::check_scan(&session.qr_state(now), &claim, now)?;

        let in_class = match (&student.department, &student.year) {
            (Some(d), Some(y)) => session.class().includes(d, y, student.section.as_deref()),
            _ => false,
        };
        if !in_class {
            return Err(ServiceError::invalid("This session is not for your class"));
        }

        let evidence = scan.evidence;
        let face = evidence.face();
        if session.requires_face_verification && face.is_none() {
            return Err(ServiceError::invalid("Face verification required for this session"));
        }
        if let Some(descriptor) = face {
            match_face(student, descriptor, settings.qr_face_match_threshold)?;
        }

        let liveness_score = LivenessPolicy::from_config()
            .evaluate(liveness::registry(), student.id, &evidence.liveness_evidence(), now)
            .await?;

        // A verified face at a rotating code already proves presence.
        if face.is_none() {
            check_geofence(&session, evidence.location, 1.0)?;
        } else if session.geofence().is_some() {
            tracing::debug!("Geofence skipped for {} via QR and face", student.id);
        }

        AttendanceService::with_pool(self.pool.clone())
            .record_check_in(student, Some(&session), evidence.captured_photo.clone(), liveness_score)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::SessionStatus;
    use crate::testing::fixtures;
    use crate::types::ClassRef;

    #[test]
    fn scan_body_flattens_evidence() {
        let id = Uuid::new_v4();
        let body = json!({
            "qrData": { "sessionId": id, "token": "abc" },
            "faceDescriptor": { "1": 0.2, "0": 0.1 },
            "livenessScore": 0.93,
            "location": { "latitude": 10.0, "longitude": 20.0 }
        });
        let scan: QrScan = serde_json::from_value(body).unwrap();
        let claim = scan.qr_data.unwrap();
        assert_eq!(claim.session_id, id);
        assert_eq!(scan.evidence.face().unwrap().as_slice(), &[0.1, 0.2]);
        assert_eq!(scan.evidence.liveness_score, Some(0.93));
        assert_eq!(scan.evidence.location.unwrap().longitude, 20.0);
    }

    #[test]
    fn no_codes_for_an_ended_session() {
        let now = Utc::now();
        let mut session = fixtures::session(Uuid::new_v4(), ClassRef::new("CS", "2", None), now);
        assert!(ensure_open(&session, now).is_ok());

        session.end_time = now - Duration::seconds(10);
        assert!(matches!(ensure_open(&session, now), Err(ServiceError::Invalid(_))));

        session.end_time = now + Duration::minutes(5);
        session.status = SessionStatus::Closed;
        assert!(ensure_open(&session, now).is_err());
    }

    #[test]
    fn scan_without_qr_data_parses() {
        let scan: QrScan = serde_json::from_value(json!({})).unwrap();
        assert!(scan.qr_data.is_none());
        assert!(scan.evidence.face().is_none());
    }
}
