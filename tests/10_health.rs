mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn root_lists_endpoints() -> Result<()> {
    let server = common::ensure_server().await?;

    let resp = reqwest::get(server.url("/")).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["name"], "Attendance API");
    assert!(body["data"]["endpoints"]["login"].is_string());
    Ok(())
}

#[tokio::test]
async fn health_reports_degraded_database() -> Result<()> {
    let server = common::ensure_server().await?;

    let resp = reqwest::get(server.url("/health")).await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = resp.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["status"], "degraded");
    Ok(())
}
