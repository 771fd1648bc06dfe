use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::{non_blank, ServiceError, ServiceResult};
use crate::config::config;
use crate::database::models::Zone;
use crate::database::{DatabaseError, DatabaseManager};
use crate::verification::GeoPoint;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewZone {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(alias = "radius")]
    pub radius_m: Option<f64>,
}

pub struct ZoneService {
    pool: PgPool,
}

impl ZoneService {
    pub fn new() -> Result<Self, DatabaseError> {
        Ok(Self { pool: DatabaseManager::pool()? })
    }

    pub async fn list(&self, owner: Uuid) -> ServiceResult<Vec<Zone>> {
        Ok(sqlx::query_as::<_, Zone>("SELECT * FROM zones WHERE created_by = $1 ORDER BY name")
            .bind(owner)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn create(&self, owner: Uuid, zone: NewZone) -> ServiceResult<Zone> {
        let (Some(name), Some(latitude), Some(longitude)) =
            (non_blank(zone.name.as_deref()), zone.latitude, zone.longitude)
        else {
            return Err(ServiceError::invalid("Name, latitude, and longitude are required"));
        };
        if !(GeoPoint { latitude, longitude }).is_valid() {
            return Err(ServiceError::invalid("Invalid coordinates"));
        }
        let radius = zone
            .radius_m
            .filter(|r| *r > 0.0)
            .unwrap_or(config().attendance.default_zone_radius_m);

        let created = sqlx::query_as::<_, Zone>(
            "INSERT INTO zones (id, name, latitude, longitude, radius_m, created_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (name, created_by) DO NOTHING
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&name)
        .bind(latitude)
        .bind(longitude)
        .bind(radius)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        created.ok_or_else(|| ServiceError::conflict("A zone with this name already exists"))
    }

    pub async fn delete(&self, owner: Uuid, id: Uuid) -> ServiceResult<()> {
        let result = sqlx::query("DELETE FROM zones WHERE id = $1 AND created_by = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::not_found("Zone not found"));
        }
        Ok(())
    }
}
