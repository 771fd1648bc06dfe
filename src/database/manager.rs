use once_cell::sync::OnceCell;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config;

/// Errors from DatabaseManager
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Owner of the single application connection pool
pub struct DatabaseManager {
    pool: OnceCell<PgPool>,
}

impl DatabaseManager {
    fn instance() -> &'static DatabaseManager {
        static INSTANCE: OnceCell<DatabaseManager> = OnceCell::new();
        INSTANCE.get_or_init(|| DatabaseManager { pool: OnceCell::new() })
    }

    /// Application pool. Connections are opened on first use, so the server
    /// can start and report degraded health while Postgres is down.
    pub fn pool() -> Result<PgPool, DatabaseError> {
        Self::instance()
            .pool
            .get_or_try_init(|| {
                let db = &config::config().database;
                let url = Self::validate_url(&db.url)?;
                let pool = PgPoolOptions::new()
                    .max_connections(db.max_connections)
                    .acquire_timeout(Duration::from_secs(db.connection_timeout))
                    .connect_lazy(&url)?;
                info!(
                    "Created database pool for: {}",
                    Self::database_name(&url).unwrap_or_else(|| "<default>".to_string())
                );
                Ok(pool)
            })
            .cloned()
    }

    fn validate_url(raw: &str) -> Result<String, DatabaseError> {
        if raw.trim().is_empty() {
            return Err(DatabaseError::ConfigMissing("DATABASE_URL"));
        }
        let url = url::Url::parse(raw).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        match url.scheme() {
            "postgres" | "postgresql" => Ok(url.into()),
            _ => Err(DatabaseError::InvalidDatabaseUrl),
        }
    }

    fn database_name(url: &str) -> Option<String> {
        let url = url::Url::parse(url).ok()?;
        let name = url.path().trim_start_matches('/');
        (!name.is_empty()).then(|| name.to_string())
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check() -> Result<(), DatabaseError> {
        let pool = Self::pool()?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    /// Applies the embedded schema migrations
    pub async fn migrate() -> Result<(), DatabaseError> {
        let pool = Self::pool()?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Close the pool (e.g., on shutdown)
    pub async fn close() {
        if let Some(pool) = Self::instance().pool.get() {
            pool.close().await;
            info!("Closed database pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_database_urls() {
        assert!(DatabaseManager::validate_url("postgres://u:p@localhost:5432/attendance").is_ok());
        assert!(DatabaseManager::validate_url("postgresql://localhost/attendance").is_ok());
        assert!(matches!(
            DatabaseManager::validate_url("mysql://localhost/attendance"),
            Err(DatabaseError::InvalidDatabaseUrl)
        ));
        assert!(matches!(
            DatabaseManager::validate_url("  "),
            Err(DatabaseError::ConfigMissing("DATABASE_URL"))
        ));
    }

    #[test]
    fn extracts_database_name() {
        assert_eq!(
            DatabaseManager::database_name("postgres://u:p@localhost:5432/attendance?sslmode=disable"),
            Some("attendance".to_string())
        );
        assert_eq!(DatabaseManager::database_name("postgres://localhost"), None);
    }
}
