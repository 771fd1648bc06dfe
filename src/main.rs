use std::net::SocketAddr;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use attendance_api::config::config;
use attendance_api::database::DatabaseManager;
use attendance_api::routes::app;
use attendance_api::services::{seed, sweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let config = config();
    config.validate().map_err(anyhow::Error::msg)?;
    tracing::info!("Starting Attendance API in {:?} mode", config.environment);

    if config.database.auto_migrate {
        if let Err(e) = DatabaseManager::migrate().await {
            tracing::error!("Migrations not applied: {}", e);
        }
    }
    if config.database.seed_on_start {
        match DatabaseManager::pool() {
            Ok(pool) => match seed::seed_defaults(&pool).await {
                Ok(logins) if !logins.is_empty() => {
                    tracing::info!("Seeded {} default accounts", logins.len())
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Seeding skipped: {}", e),
            },
            Err(e) => tracing::warn!("Seeding skipped: {}", e),
        }
    }

    let sweep = Duration::from_secs(config.attendance.sweep_interval_secs.max(1));
    let sweeper = sweeper::spawn(sweep);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Attendance API listening on http://{}", bind_addr);

    axum::serve(listener, app().into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    DatabaseManager::close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
