// handlers/public/auth.rs - POST /api/auth/login

use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::user_service::LoginOutcome;
use crate::services::UserService;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Username is a roll number, a staff id or an email. A successful login
/// signs every other device out.
pub async fn login(Json(body): Json<LoginRequest>) -> ApiResult<LoginOutcome> {
    let (Some(username), Some(password)) = (body.username, body.password) else {
        return Err(ApiError::bad_request("Username and password are required"));
    };
    if username.trim().is_empty() || password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required"));
    }

    let outcome = UserService::new()?.login(&username, &password).await.map_err(|e| {
        tracing::info!("Login failed for {}: {}", username.trim(), e);
        ApiError::from(e)
    })?;
    Ok(ApiResponse::success(outcome))
}
