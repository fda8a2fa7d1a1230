//! Health check command.

use anyhow::Result;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

pub async fn execute(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get("/health", &[]).await?;

    match format {
        OutputFormat::Table => {
            let status = health
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            output::print_header("Server Health");
            output::print_detail("Status", status);
            output::print_detail("API URL", client.base_url());

            for (label, key) in [("Version", "version"), ("Storage", "storage"), ("Timestamp", "timestamp")] {
                if let Some(value) = health.get(key).and_then(|v| v.as_str()) {
                    output::print_detail(label, value);
                }
            }
            if let Some(policies) = health.get("policies").and_then(|v| v.as_u64()) {
                output::print_detail("Policies", &policies.to_string());
            }

            if status == "healthy" {
                output::print_success("Kernel is up");
            } else {
                output::print_error(&format!("Server status: {}", status));
            }
        }
        _ => output::print_item(&health, format)?,
    }

    Ok(())
}
