//! Event log listing.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct EventsArgs {
    /// Only events at or after this RFC 3339 timestamp
    #[arg(short, long)]
    since: Option<DateTime<Utc>>,

    /// Show at most this many of the latest events
    #[arg(short, long)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEvent {
    id: String,
    seq: u64,
    timestamp: DateTime<Utc>,
    day: NaiveDate,
    #[serde(rename = "type")]
    event_type: String,
    metadata: serde_json::Value,
    idempotency_key: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Seq")]
    seq: u64,
    #[tabled(rename = "Day")]
    day: NaiveDate,
    #[tabled(rename = "Type")]
    event_type: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Metadata")]
    metadata: String,
}

impl From<&StoredEvent> for EventRow {
    fn from(e: &StoredEvent) -> Self {
        Self {
            seq: e.seq,
            day: e.day,
            event_type: e.event_type.clone(),
            key: e.idempotency_key.clone(),
            metadata: e.metadata.to_string(),
        }
    }
}

pub async fn execute(args: EventsArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let query: Vec<(&str, String)> = args
        .since
        .map(|since| vec![("since", since.to_rfc3339())])
        .unwrap_or_default();
    let mut events: Vec<StoredEvent> = client.get("/v1/events", &query).await?;

    if let Some(limit) = args.limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }

    match format {
        OutputFormat::Table => {
            let rows: Vec<EventRow> = events.iter().map(EventRow::from).collect();
            output::print_table(&rows);
        }
        _ => output::print_item(&events, format)?,
    }

    Ok(())
}
