use anyhow::Context;
use serde_json::json;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::database::DatabaseManager;
use crate::services::{seed, sweeper};

pub async fn migrate(output_format: OutputFormat) -> anyhow::Result<()> {
    DatabaseManager::migrate().await.context("migration failed")?;
    output_success(output_format, "Migrations applied", None)
}

pub async fn seed(output_format: OutputFormat) -> anyhow::Result<()> {
    let pool = DatabaseManager::pool()?;
    let logins = seed::seed_defaults(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("seeding failed: {}", e))?;

    if logins.is_empty() {
        return output_success(output_format, "Database already has users, nothing seeded", None);
    }
    if let OutputFormat::Text = output_format {
        for login in &logins {
            println!("{:<10} username: {:<24} password: {}", login.role, login.username, login.password);
        }
    }
    let data = json!({
        "accounts": logins
            .iter()
            .map(|l| json!({ "role": l.role, "username": l.username, "password": l.password }))
            .collect::<Vec<_>>()
    });
    output_success(output_format, &format!("Seeded {} accounts", logins.len()), Some(data))
}

pub async fn sweep(output_format: OutputFormat) -> anyhow::Result<()> {
    let closed = sweeper::sweep_once().await;
    output_success(
        output_format,
        &format!("Closed {} expired sessions", closed),
        Some(json!({ "closed": closed })),
    )
}
