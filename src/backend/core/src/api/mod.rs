//! HTTP API for the kernel.
//!
//! - `POST /v1/commands` submits a command for the calling user
//! - `GET /v1/state` returns today's state and suggestions
//! - `GET /v1/events` returns the ordered event log
//! - `GET /health` and `GET /metrics` are unauthenticated
//!
//! The caller is identified by the `x-user-id` header. Authentication itself
//! happens upstream.

mod extract;
mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::kernel::Kernel;

pub use handlers::{EventsParams, StateParams};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub kernel: Kernel,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/v1/commands", post(handlers::submit_command))
        .route("/v1/state", get(handlers::get_state))
        .route("/v1/events", get(handlers::list_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
