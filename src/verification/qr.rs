use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A freshly rotated session token.
#[derive(Debug, Clone, PartialEq)]
pub struct QrGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl QrGrant {
    pub fn issue(now: DateTime<Utc>, refresh: Duration) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            expires_at: now + refresh,
        }
    }

    /// The string encoded into the QR image.
    pub fn payload(&self, session_id: Uuid) -> String {
        let payload = QrPayload {
            session_id,
            token: self.token.clone(),
            expires_at: self.expires_at.timestamp_millis(),
        };
        // Serializing a struct of plain fields cannot fail.
        serde_json::to_string(&payload).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub session_id: Uuid,
    pub token: String,
    /// Milliseconds since the epoch.
    pub expires_at: i64,
}

/// What a student's scanner read off the screen.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrClaim {
    pub session_id: Uuid,
    pub token: String,
}

/// The token state of a session at scan time.
#[derive(Debug, Clone, Copy)]
pub struct QrState<'a> {
    pub session_id: Uuid,
    pub active: bool,
    pub enabled: bool,
    pub token: Option<&'a str>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QrRejection {
    #[error("QR code data required")]
    MissingToken,
    #[error("Invalid or expired QR code")]
    Invalid,
    #[error("QR code has expired. Please scan the new code.")]
    Expired,
}

pub fn check_scan(state: &QrState<'_>, claim: &QrClaim, now: DateTime<Utc>) -> Result<(), QrRejection> {
    if claim.token.trim().is_empty() {
        return Err(QrRejection::MissingToken);
    }
    let token_matches = state.token.map(|t| t == claim.token).unwrap_or(false);
    if state.session_id != claim.session_id || !state.active || !state.enabled || !token_matches {
        return Err(QrRejection::Invalid);
    }
    match state.expires_at {
        Some(expiry) if now <= expiry => Ok(()),
        _ => Err(QrRejection::Expired),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state<'a>(id: Uuid, grant: &'a QrGrant) -> QrState<'a> {
        QrState {
            session_id: id,
            active: true,
            enabled: true,
            token: Some(&grant.token),
            expires_at: Some(grant.expires_at),
        }
    }

    #[test]
    fn payload_carries_millis_expiry() {
        let now = Utc::now();
        let grant = QrGrant::issue(now, Duration::seconds(30));
        let id = Uuid::new_v4();
        let payload: QrPayload = serde_json::from_str(&grant.payload(id)).unwrap();
        assert_eq!(payload.session_id, id);
        assert_eq!(payload.token, grant.token);
        assert_eq!(payload.expires_at, (now + Duration::seconds(30)).timestamp_millis());
    }

    #[test]
    fn accepts_current_token_until_expiry() {
        let now = Utc::now();
        let grant = QrGrant::issue(now, Duration::seconds(30));
        let id = Uuid::new_v4();
        let claim = QrClaim { session_id: id, token: grant.token.clone() };
        assert_eq!(check_scan(&state(id, &grant), &claim, now), Ok(()));
        assert_eq!(check_scan(&state(id, &grant), &claim, grant.expires_at), Ok(()));
        assert_eq!(
            check_scan(&state(id, &grant), &claim, grant.expires_at + Duration::milliseconds(1)),
            Err(QrRejection::Expired)
        );
    }

    #[test]
    fn rotated_token_is_invalid() {
        let now = Utc::now();
        let old = QrGrant::issue(now, Duration::seconds(30));
        let new = QrGrant::issue(now, Duration::seconds(30));
        assert_ne!(old.token, new.token);
        let id = Uuid::new_v4();
        let claim = QrClaim { session_id: id, token: old.token.clone() };
        assert_eq!(check_scan(&state(id, &new), &claim, now), Err(QrRejection::Invalid));
    }

    #[test]
    fn closed_or_disabled_session_is_invalid() {
        let now = Utc::now();
        let grant = QrGrant::issue(now, Duration::seconds(30));
        let id = Uuid::new_v4();
        let claim = QrClaim { session_id: id, token: grant.token.clone() };

        let closed = QrState { active: false, ..state(id, &grant) };
        assert_eq!(check_scan(&closed, &claim, now), Err(QrRejection::Invalid));

        let disabled = QrState { enabled: false, ..state(id, &grant) };
        assert_eq!(check_scan(&disabled, &claim, now), Err(QrRejection::Invalid));

        let other = QrClaim { session_id: Uuid::new_v4(), token: grant.token.clone() };
        assert_eq!(check_scan(&state(id, &grant), &other, now), Err(QrRejection::Invalid));

        let blank = QrClaim { session_id: id, token: " ".into() };
        assert_eq!(check_scan(&state(id, &grant), &blank, now), Err(QrRejection::MissingToken));
    }
}
