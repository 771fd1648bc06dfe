pub mod password;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::database::models::Role;

pub use password::{hash_password, verify_password};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    /// Must equal the user's stored session token; a newer login replaces it.
    pub sid: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, role: Role, session_token: String) -> Self {
        let now = Utc::now();
        let expiry_hours = config::config().security.jwt_expiry_hours;
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: user_id,
            role,
            sid: session_token,
            exp,
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Session expired. You have been logged in on another device.")]
    SessionReplaced,

    #[error("Account is deactivated")]
    Inactive,

    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

/// A fresh random session token for single-device login.
pub fn new_session_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn generate_jwt(claims: &Claims) -> Result<String, AuthError> {
    let secret = &config::config().security.jwt_secret;

    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    let header = Header::default();

    encode(&header, claims, &encoding_key).map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

pub fn decode_jwt(token: &str) -> Result<Claims, AuthError> {
    let secret = &config::config().security.jwt_secret;

    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &decoding_key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("JWT rejected: {}", e);
            AuthError::InvalidToken
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip() {
        let id = Uuid::new_v4();
        let claims = Claims::new(id, Role::Staff, new_session_token());
        let token = generate_jwt(&claims).unwrap();
        let decoded = decode_jwt(&token).unwrap();
        assert_eq!(decoded.sub, id);
        assert_eq!(decoded.role, Role::Staff);
        assert_eq!(decoded.sid, claims.sid);
    }

    #[test]
    fn rejects_tampered_token() {
        let claims = Claims::new(Uuid::new_v4(), Role::Student, new_session_token());
        let mut token = generate_jwt(&claims).unwrap();
        token.push('x');
        assert!(matches!(decode_jwt(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn rejects_expired_token() {
        let mut claims = Claims::new(Uuid::new_v4(), Role::Student, new_session_token());
        claims.exp = Utc::now().timestamp() - 3_600;
        let token = generate_jwt(&claims).unwrap();
        assert!(decode_jwt(&token).is_err());
    }
}
