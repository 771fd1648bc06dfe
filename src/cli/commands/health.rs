use std::time::Duration;

use serde_json::Value;

use crate::cli::utils::output_fields;
use crate::cli::OutputFormat;

pub async fn check(base_url: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
    let url = format!("{}/health", base_url.trim_end_matches('/'));

    let response = client.get(&url).send().await?;
    let status = response.status();
    let body: Value = response.json().await?;

    output_fields(output_format, &body)?;
    if !status.is_success() {
        anyhow::bail!("server at {} is unhealthy ({})", base_url, status);
    }
    Ok(())
}
