use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;
use crate::types::ClassRef;
use crate::verification::geo::{GeoPoint, Geofence};
use crate::verification::qr::QrState;

text_enum! {
    SessionStatus {
        Active => "active",
        Closed => "closed",
    }
}

/// A time-boxed window in which a class can check in for one period.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub department: String,
    pub year: String,
    pub section: Option<String>,
    pub period: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_m: f64,
    pub location_name: Option<String>,
    pub qr_enabled: bool,
    #[serde(skip_serializing)]
    pub qr_token: Option<String>,
    pub qr_expires_at: Option<DateTime<Utc>>,
    pub requires_face_verification: bool,
    pub closed_by: Option<Uuid>,
    pub close_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AttendanceSession {
    pub fn class(&self) -> ClassRef {
        ClassRef::new(self.department.clone(), self.year.clone(), self.section.clone())
    }

    /// Active and not yet past its end time.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && self.end_time > now
    }

    /// Token state for a scan at `now`. A session past its end time counts as
    /// inactive even before the sweeper closes it.
    pub fn qr_state(&self, now: DateTime<Utc>) -> QrState<'_> {
        QrState {
            session_id: self.id,
            active: self.is_open(now),
            enabled: self.qr_enabled,
            token: self.qr_token.as_deref(),
            expires_at: self.qr_expires_at,
        }
    }

    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds().max(0)
    }

    /// The check-in fence, when the session was started with a location.
    pub fn geofence(&self) -> Option<Geofence> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Geofence {
                center: GeoPoint { latitude: lat, longitude: lon },
                radius_m: self.radius_m,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use crate::verification::qr::{check_scan, QrClaim, QrGrant, QrRejection};
    use chrono::Duration;

    #[test]
    fn open_until_end_time() {
        let now = Utc::now();
        let mut session = fixtures::session(Uuid::new_v4(), ClassRef::new("CS", "2", None), now);
        assert!(session.is_open(now));
        assert!(!session.is_open(session.end_time + Duration::seconds(1)));

        session.status = SessionStatus::Closed;
        assert!(!session.is_open(now));
    }

    #[test]
    fn scan_after_end_time_is_rejected_while_still_active() {
        let now = Utc::now();
        let mut session = fixtures::session(Uuid::new_v4(), ClassRef::new("CS", "2", None), now);
        let grant = QrGrant::issue(now, Duration::seconds(30));
        session.qr_enabled = true;
        session.qr_token = Some(grant.token.clone());
        session.qr_expires_at = Some(grant.expires_at);
        let claim = QrClaim { session_id: session.id, token: grant.token.clone() };

        assert_eq!(check_scan(&session.qr_state(now), &claim, now), Ok(()));

        // Ended ten seconds ago, sweeper has not run yet.
        session.end_time = now - Duration::seconds(10);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(check_scan(&session.qr_state(now), &claim, now), Err(QrRejection::Invalid));
    }

    #[test]
    fn geofence_only_with_coordinates() {
        let now = Utc::now();
        let mut session = fixtures::session(Uuid::new_v4(), ClassRef::new("CS", "2", None), now);
        assert!(session.geofence().is_none());

        session.latitude = Some(13.0);
        session.longitude = Some(80.2);
        let fence = session.geofence().unwrap();
        assert_eq!(fence.radius_m, 50.0);
    }

    #[test]
    fn qr_token_is_never_serialized() {
        let mut session = fixtures::session(Uuid::new_v4(), ClassRef::new("CS", "2", None), Utc::now());
        session.qr_token = Some("secret".into());
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("qrToken").is_none());
        assert_eq!(json["status"], "active");
    }
}
