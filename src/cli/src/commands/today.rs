//! Today's state and suggestions.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct TodayArgs {
    /// Minutes east of UTC; defaults to the server's setting
    #[arg(long, allow_hyphen_values = true)]
    tz: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TodayView {
    state: serde_json::Value,
    suggestions: Vec<Suggestion>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Suggestion {
    id: String,
    policy: String,
    #[serde(rename = "type")]
    action_type: String,
    priority: u32,
    reason: Reason,
    #[serde(default)]
    cooldown_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Reason {
    code: String,
    detail: String,
}

#[derive(Tabled)]
struct SuggestionRow {
    #[tabled(rename = "Priority")]
    priority: u32,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Why")]
    why: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl From<&Suggestion> for SuggestionRow {
    fn from(s: &Suggestion) -> Self {
        Self {
            priority: s.priority,
            action: s.action_type.clone(),
            why: s.reason.detail.clone(),
            id: s.id.clone(),
        }
    }
}

fn field(state: &serde_json::Value, key: &str) -> String {
    match state.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() != 0.0 => format!("{:.2}", f),
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
        None => "-".to_string(),
    }
}

pub async fn execute(args: TodayArgs, default_tz: Option<i32>, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let query: Vec<(&str, String)> = args
        .tz
        .or(default_tz)
        .map(|tz| vec![("tzOffsetMinutes", tz.to_string())])
        .unwrap_or_default();
    let view: TodayView = client.get("/v1/state", &query).await?;

    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Today for {} ({})", client.user(), field(&view.state, "day")));
            for (label, key) in [
                ("Mode", "mode"),
                ("Momentum", "momentum"),
                ("Load", "load"),
                ("Planned minutes", "plannedMinutes"),
                ("Free minutes", "freeMinutes"),
                ("Focus capacity", "focusCapacity"),
                ("Backlog pressure", "backlogPressure"),
            ] {
                output::print_detail(label, &field(&view.state, key));
            }

            output::print_header("Suggestions");
            let rows: Vec<SuggestionRow> = view.suggestions.iter().map(SuggestionRow::from).collect();
            output::print_table(&rows);
        }
        _ => output::print_item(&view, format)?,
    }

    Ok(())
}
