//! API request handlers.
//!
//! Handlers return `Result<_, KernelError>`; errors render through the
//! `IntoResponse` impl on `KernelError`.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::AppState;
use crate::commands::CommandOutcome;
use crate::error::Result;
use crate::events::{EventQuery, StoredEvent, UserId};
use crate::kernel::TodayView;
use crate::local::SubmitRequest;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "storage": state.kernel.log().storage().name(),
        "policies": state.kernel.registry().len(),
        "timestamp": Utc::now().to_rfc3339()
    }))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "metrics exporter not installed".to_string(),
        ),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn submit_command(
    State(state): State<AppState>,
    user: UserId,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<CommandOutcome>> {
    let outcome = state.kernel.submit(&user, &req.command).await?;
    Ok(Json(outcome))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateParams {
    pub tz_offset_minutes: Option<i32>,
}

pub async fn get_state(
    State(state): State<AppState>,
    user: UserId,
    Query(params): Query<StateParams>,
) -> Result<Json<TodayView>> {
    let view = state.kernel.today(&user, params.tz_offset_minutes).await?;
    Ok(Json(view))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    pub since: Option<DateTime<Utc>>,
}

pub async fn list_events(
    State(state): State<AppState>,
    user: UserId,
    Query(params): Query<EventsParams>,
) -> Result<Json<Vec<StoredEvent>>> {
    let query = match params.since {
        Some(since) => EventQuery::since(since),
        None => EventQuery::all(),
    };
    let events = state.kernel.events(&user, &query).await?;
    Ok(Json(events))
}
