use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::NaiveDate;

use super::AuthError;

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// False for a wrong password and for a malformed stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// `hash_password` on the blocking pool; argon2 is too slow for a runtime worker.
pub async fn hash_password_async(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

/// `verify_password` on the blocking pool.
pub async fn verify_password_async(password: String, stored_hash: String) -> bool {
    match tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash)).await {
        Ok(matched) => matched,
        Err(e) => {
            tracing::error!("Password verification task failed: {}", e);
            false
        }
    }
}

/// Students log in with their date of birth as `DD-MM-YYYY` until they
/// change it.
pub fn dob_password(dob: NaiveDate) -> String {
    dob.format("%d-%m-%Y").to_string()
}

/// Accepts `YYYY-MM-DD` (form input) or `DD-MM-YYYY`.
pub fn parse_dob(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.split('T').next().unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d-%m-%Y"))
        .ok()
}

pub fn validate_new_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword(MIN_PASSWORD_LEN));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("password123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("password123", &hash));
        assert!(!verify_password("password124", &hash));
        assert!(!verify_password("password123", "not-a-hash"));
    }

    #[tokio::test]
    async fn hashing_off_the_runtime_matches_inline() {
        let hash = hash_password_async("secret-pass".to_string()).await.unwrap();
        assert!(verify_password("secret-pass", &hash));
        assert!(verify_password_async("secret-pass".to_string(), hash.clone()).await);
        assert!(!verify_password_async("wrong-pass".to_string(), hash).await);
    }

    #[test]
    fn dob_formats() {
        let dob = NaiveDate::from_ymd_opt(2005, 1, 1).unwrap();
        assert_eq!(dob_password(dob), "01-01-2005");
        assert_eq!(parse_dob("2005-01-01"), Some(dob));
        assert_eq!(parse_dob("01-01-2005"), Some(dob));
        assert_eq!(parse_dob("2005-01-01T00:00:00.000Z"), Some(dob));
        assert_eq!(parse_dob("yesterday"), None);
    }

    #[test]
    fn short_passwords_rejected() {
        assert!(validate_new_password("12345").is_err());
        assert!(validate_new_password("123456").is_ok());
    }
}
