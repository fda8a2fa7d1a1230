//! Configuration management.

use std::time::Duration;

use serde::Deserialize;

use crate::local::RetryPolicy;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration. Absent means in-memory event storage.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Kernel configuration
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Built-in policy thresholds
    #[serde(default)]
    pub policies: PolicyThresholds,

    /// Outbox reconciliation configuration
    #[serde(default)]
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Run embedded migrations at startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name reported to the collector
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KernelConfig {
    /// Days of history handed to policies
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: u32,

    /// Offset used when a command omits `tzOffsetMinutes`
    #[serde(default)]
    pub default_tz_offset_minutes: i32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            recent_window_days: default_recent_window_days(),
            default_tz_offset_minutes: 0,
        }
    }
}

/// Thresholds and cooldown windows for the built-in policies.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyThresholds {
    /// Overload fires when planned exceeds free by more than this many minutes
    #[serde(default = "default_overload_margin")]
    pub overload_margin_minutes: u32,

    /// Momentum builder fires when completions over 3 days are below this
    #[serde(default = "default_min_completions")]
    pub min_completions_3_days: u32,

    /// Smallest free block considered usable for focus work
    #[serde(default = "default_focus_block")]
    pub focus_block_minutes: u32,

    /// Habit downshift fires under this 7-day completion ratio
    #[serde(default = "default_habit_ratio")]
    pub habit_completion_floor: f64,

    /// Spend ratio above which a category is drifting
    #[serde(default = "default_drift_ratio")]
    pub spend_drift_ratio: f64,

    /// Local minute of day after which the review is offered
    #[serde(default = "default_review_minute")]
    pub review_after_minute: u32,

    /// Backlog pressure that opens the valve
    #[serde(default = "default_backlog_limit")]
    pub backlog_pressure_limit: f64,

    /// Default suppression window for cooldown keys
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,

    /// Suppression window for the daily review
    #[serde(default = "default_review_cooldown", with = "humantime_serde")]
    pub review_cooldown: Duration,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            overload_margin_minutes: default_overload_margin(),
            min_completions_3_days: default_min_completions(),
            focus_block_minutes: default_focus_block(),
            habit_completion_floor: default_habit_ratio(),
            spend_drift_ratio: default_drift_ratio(),
            review_after_minute: default_review_minute(),
            backlog_pressure_limit: default_backlog_limit(),
            cooldown: default_cooldown(),
            review_cooldown: default_review_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutboxConfig {
    /// Retry policy applied to transient remote failures
    #[serde(default)]
    pub retry: RetryPolicy,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "lifeos".to_string() }
fn default_recent_window_days() -> u32 { 7 }
fn default_overload_margin() -> u32 { 30 }
fn default_min_completions() -> u32 { 2 }
fn default_focus_block() -> u32 { 90 }
fn default_habit_ratio() -> f64 { 0.5 }
fn default_drift_ratio() -> f64 { 1.0 }
fn default_review_minute() -> u32 { 18 * 60 }
fn default_backlog_limit() -> f64 { 10.0 }
fn default_cooldown() -> Duration { Duration::from_secs(4 * 3600) }
fn default_review_cooldown() -> Duration { Duration::from_secs(20 * 3600) }

impl Config {
    /// Load from `LIFEOS_CONFIG` when it names a file, else from the
    /// environment alone.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("LIFEOS_CONFIG") {
            return Self::from_file(&path);
        }
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("LIFEOS").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("LIFEOS").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
