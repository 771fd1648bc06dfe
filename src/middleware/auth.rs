use axum::{
    extract::Request,
    http::{HeaderMap, Uri},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::{self, AuthError};
use crate::database::models::{Role, User};
use crate::error::ApiError;
use crate::services::user_service::UserService;

/// Authenticated user context, loaded fresh from the database per request
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user: User,
}

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn require_student(&self) -> Result<&User, ApiError> {
        if self.user.role == Role::Student {
            Ok(&self.user)
        } else {
            Err(ApiError::forbidden("Only students can perform this action"))
        }
    }

    pub fn require_staff(&self) -> Result<&User, ApiError> {
        if self.user.role.is_staff_or_above() {
            Ok(&self.user)
        } else {
            Err(ApiError::forbidden("Not authorized as staff"))
        }
    }

    pub fn require_hod_or_above(&self) -> Result<&User, ApiError> {
        if self.user.role.is_hod_or_above() {
            Ok(&self.user)
        } else {
            Err(ApiError::forbidden("Not authorized as HOD"))
        }
    }

    pub fn require_role(&self, role: Role) -> Result<&User, ApiError> {
        if self.user.role == role {
            Ok(&self.user)
        } else {
            Err(ApiError::forbidden(format!("Not authorized as {}", role)))
        }
    }

    pub fn require_advisor(&self) -> Result<&User, ApiError> {
        if self.user.can_act_as_advisor() {
            Ok(&self.user)
        } else {
            Err(ApiError::forbidden("Not authorized as Faculty Advisor"))
        }
    }
}

/// JWT authentication middleware: validates the bearer token, loads the
/// user and enforces single-device login through the session token.
pub async fn jwt_auth_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_jwt(&headers, request.uri()).map_err(ApiError::unauthorized)?;
    let claims = auth::decode_jwt(&token)?;

    let user = UserService::new()?
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Not authorized, user not found"))?;

    if !user.is_active {
        return Err(AuthError::Inactive.into());
    }
    if user.session_token.as_deref() != Some(claims.sid.as_str()) {
        return Err(AuthError::SessionReplaced.into());
    }

    request.extensions_mut().insert(AuthUser { user });

    Ok(next.run(request).await)
}

/// Token from the Authorization header, or from the `token` query parameter
/// for clients that cannot set headers (browser event streams).
fn extract_jwt(headers: &HeaderMap, uri: &Uri) -> Result<String, String> {
    match headers.get("authorization") {
        Some(value) => {
            let auth_str = value
                .to_str()
                .map_err(|_| "Invalid Authorization header format".to_string())?;
            let token = auth_str
                .strip_prefix("Bearer ")
                .ok_or_else(|| "Authorization header must use Bearer token format".to_string())?;
            if token.trim().is_empty() {
                return Err("Empty JWT token".to_string());
            }
            Ok(token.trim().to_string())
        }
        None => query_token(uri).ok_or_else(|| "Not authorized, no token".to_string()),
    }
}

fn query_token(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_is_required_format() {
        let uri: Uri = "/api/auth/profile".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert!(extract_jwt(&headers, &uri).is_err());

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_jwt(&headers, &uri).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert!(extract_jwt(&headers, &uri).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_jwt(&headers, &uri).unwrap(), "abc.def");
    }

    #[test]
    fn query_token_fallback() {
        let uri: Uri = "/api/events?x=1&token=abc%2Edef".parse().unwrap();
        assert_eq!(extract_jwt(&HeaderMap::new(), &uri).unwrap(), "abc.def");

        let empty: Uri = "/api/events?token=".parse().unwrap();
        assert!(extract_jwt(&HeaderMap::new(), &empty).is_err());
    }

    #[test]
    fn role_guards() {
        let student = AuthUser {
            user: crate::testing::fixtures::student("S", "1", crate::types::ClassRef::new("CS", "2", None)),
        };
        assert!(student.require_student().is_ok());
        assert_eq!(student.require_staff().unwrap_err().status_code(), 403);

        let mut hod = crate::testing::fixtures::staff("H");
        hod.role = Role::Hod;
        let hod = AuthUser { user: hod };
        assert!(hod.require_staff().is_ok());
        assert!(hod.require_hod_or_above().is_ok());
        assert!(hod.require_role(Role::Superadmin).is_err());
        assert!(hod.require_advisor().is_err());
    }
}
