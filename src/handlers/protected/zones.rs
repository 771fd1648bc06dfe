// handlers/protected/zones.rs - Saved geofences (staff)

use axum::{extract::Path, Extension, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::Zone;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::zone_service::NewZone;
use crate::services::ZoneService;

pub async fn zones_get(Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Zone>> {
    let staff = auth.require_staff()?;
    Ok(ApiResponse::success(ZoneService::new()?.list(staff.id).await?))
}

pub async fn zones_post(
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<NewZone>,
) -> ApiResult<Zone> {
    let staff = auth.require_staff()?;
    let zone = ZoneService::new()?.create(staff.id, body).await?;
    tracing::info!("Zone '{}' saved by {}", zone.name, staff.name);
    Ok(ApiResponse::created(zone))
}

pub async fn zone_delete(
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Value> {
    let staff = auth.require_staff()?;
    ZoneService::new()?.delete(staff.id, id).await?;
    Ok(ApiResponse::success(json!({ "message": "Zone deleted" })))
}
