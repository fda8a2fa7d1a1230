//! Observability: structured logging, distributed tracing, and metrics.

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ObservabilityConfig;

/// Initialize the observability stack.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let fmt_layer = if config.json_logging {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().pretty().boxed()
    };

    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config().with_resource(
                        opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                            "service.name",
                            config.service_name.clone(),
                        )]),
                    ),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    metrics::register_metrics();
    Ok(())
}

/// Flush and shut down OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Metric names and recording helpers.
pub mod metrics {
    use metrics::{counter, describe_counter, describe_gauge, gauge};
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

    /// Install the Prometheus recorder. Call before [`register_metrics`] so
    /// descriptions reach the exporter.
    pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
        let handle = PrometheusBuilder::new()
            .add_global_label("service", "lifeos")
            .install_recorder()?;
        Ok(handle)
    }

    /// Register all metric descriptions.
    pub fn register_metrics() {
        describe_counter!(
            "lifeos_commands_total",
            "Commands processed, labelled by cmd and outcome"
        );
        describe_counter!(
            "lifeos_events_appended_total",
            "Events durably appended to the log"
        );
        describe_counter!(
            "lifeos_suggestions_total",
            "Suggestions surfaced, labelled by policy"
        );
        describe_counter!("lifeos_errors_total", "Errors constructed, labelled by code");
        describe_gauge!("lifeos_outbox_depth", "Commands awaiting acknowledgement");
    }

    /// Record one executed command.
    pub fn record_command(cmd: &str, outcome: &'static str) {
        counter!("lifeos_commands_total", "cmd" => cmd.to_string(), "outcome" => outcome)
            .increment(1);
    }

    pub fn record_events_appended(count: usize) {
        counter!("lifeos_events_appended_total").increment(count as u64);
    }

    pub fn record_suggestion(policy: &str) {
        counter!("lifeos_suggestions_total", "policy" => policy.to_string()).increment(1);
    }

    pub fn set_outbox_depth(depth: usize) {
        gauge!("lifeos_outbox_depth").set(depth as f64);
    }
}
