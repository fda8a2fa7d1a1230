//! Submit a command.

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct SubmitArgs {
    /// Command name (create_task, complete_task, log_habit, add_expense, ...)
    cmd: String,

    /// Command input as JSON
    #[arg(short, long, default_value = "{}")]
    input: String,

    /// Idempotency key; reuse it to retry safely. Generated when omitted.
    #[arg(short, long)]
    key: Option<String>,

    /// Minutes east of UTC used to date the events
    #[arg(long, allow_hyphen_values = true)]
    tz: Option<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandBody {
    cmd: String,
    input: serde_json::Value,
    idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tz_offset_minutes: Option<i32>,
}

#[derive(Serialize)]
struct SubmitRequest {
    command: CommandBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandOutcome {
    success: bool,
    #[serde(default)]
    deduped: bool,
    #[serde(default)]
    events: Vec<EventRef>,
}

#[derive(Debug, Serialize, Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct EventRef {
    #[tabled(rename = "Seq")]
    seq: u64,
    #[tabled(rename = "Key")]
    idempotency_key: String,
    #[tabled(rename = "Event ID")]
    id: String,
}

pub async fn execute(args: SubmitArgs, default_tz: Option<i32>, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let input: serde_json::Value =
        serde_json::from_str(&args.input).context("--input must be valid JSON")?;
    let key = args.key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let request = SubmitRequest {
        command: CommandBody {
            cmd: args.cmd.clone(),
            input,
            idempotency_key: key.clone(),
            tz_offset_minutes: args.tz.or(default_tz),
        },
    };
    let outcome: CommandOutcome = client.post("/v1/commands", &request).await?;

    match format {
        OutputFormat::Table => {
            if outcome.deduped {
                output::print_info(&format!("{} already applied under key {}", args.cmd, key));
            } else {
                output::print_success(&format!("{} applied (key {})", args.cmd, key));
            }
            output::print_table(&outcome.events);
        }
        _ => output::print_item(&outcome, format)?,
    }

    Ok(())
}
