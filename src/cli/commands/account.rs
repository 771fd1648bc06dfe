use serde_json::json;

use crate::auth::{self, password, Claims};
use crate::cli::utils::output_fields;
use crate::cli::OutputFormat;
use crate::services::UserService;

pub fn hash_password(plain: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    password::validate_new_password(plain)?;
    let hash = password::hash_password(plain)?;
    output_fields(output_format, &json!({ "hash": hash }))
}

/// Rotates the user's session token, so their other devices are signed out.
pub async fn token(username: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let users = UserService::new()?;
    let user = users
        .find_by_login(username)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no user matches '{}'", username))?;

    let session_token = users.rotate_session_token(user.id).await?;
    let token = auth::generate_jwt(&Claims::new(user.id, user.role, session_token))?;
    tracing::info!("Issued CLI token for {}", user.login_id());

    output_fields(
        output_format,
        &json!({ "user": user.name, "role": user.role, "token": token }),
    )
}
