//! Error handling for the LifeOS kernel.
//!
//! Every failure is a [`KernelError`] carrying a stable [`ErrorCode`]. The code
//! decides the HTTP status, the log level, and whether the outbox retries.
//!
//! The kernel's failure taxonomy maps onto codes as follows:
//!
//! | Kind | Codes | Surfaced? |
//! |---|---|---|
//! | validation | `VALIDATION_ERROR`, `UNKNOWN_COMMAND`, `INVALID_INPUT`, `TASK_NOT_FOUND`, ... | yes, verbatim |
//! | storage | `STORAGE_UNAVAILABLE`, `NETWORK_ERROR` | retried by the outbox |
//! | reconciliation | `RECONCILIATION_CONFLICT` | logged only |
//! | corruption | `CORRUPT_EVENT` | yes, fatal for the replay |
//!
//! A duplicate command is not an error at all; it is reported as a successful
//! [`CommandOutcome`](crate::commands::CommandOutcome) with `deduped = true`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and travel over the wire to local-first clients,
/// which use them to tell a rejected command from a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Command Validation (1000-1099)
    ValidationError,
    UnknownCommand,
    InvalidInput,
    MissingIdempotencyKey,
    TaskNotFound,
    InvalidStateTransition,
    SuggestionAlreadyResolved,

    // Event Log (1100-1199)
    CorruptEvent,
    DuplicateRecord,

    // Storage (2000-2099)
    StorageError,
    StorageUnavailable,
    StorageTransactionFailed,

    // Serialization (2200-2299)
    SerializationError,
    DeserializationError,

    // Remote / Sync (3000-3099)
    NetworkError,
    RemoteRejected,
    ReconciliationConflict,

    // Authentication (4000-4099)
    Unauthorized,

    // Configuration (5000-5099)
    ConfigurationError,
    MissingConfiguration,

    // Internal (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ValidationError => 1000,
            Self::UnknownCommand => 1001,
            Self::InvalidInput => 1002,
            Self::MissingIdempotencyKey => 1003,
            Self::TaskNotFound => 1004,
            Self::InvalidStateTransition => 1005,
            Self::SuggestionAlreadyResolved => 1006,

            Self::CorruptEvent => 1100,
            Self::DuplicateRecord => 1101,

            Self::StorageError => 2000,
            Self::StorageUnavailable => 2001,
            Self::StorageTransactionFailed => 2002,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::NetworkError => 3000,
            Self::RemoteRejected => 3001,
            Self::ReconciliationConflict => 3002,

            Self::Unauthorized => 4000,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::TaskNotFound => StatusCode::NOT_FOUND,

            Self::InvalidStateTransition
            | Self::SuggestionAlreadyResolved
            | Self::DuplicateRecord
            | Self::ReconciliationConflict => StatusCode::CONFLICT,

            Self::ValidationError
            | Self::UnknownCommand
            | Self::InvalidInput
            | Self::MissingIdempotencyKey
            | Self::RemoteRejected => StatusCode::UNPROCESSABLE_ENTITY,

            Self::Unauthorized => StatusCode::UNAUTHORIZED,

            Self::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::NetworkError => StatusCode::BAD_GATEWAY,

            Self::CorruptEvent
            | Self::StorageError
            | Self::StorageTransactionFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Transient failures the outbox retries with backoff.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable
                | Self::StorageTransactionFailed
                | Self::NetworkError
        )
    }

    /// Failures caused by the command itself. Retrying cannot fix these.
    pub const fn is_validation(&self) -> bool {
        matches!(self.numeric_code(), 1000..=1099)
            || matches!(self, Self::RemoteRejected | Self::Unauthorized)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "validation",
            1100..=1199 => "event_log",
            2000..=2099 => "storage",
            2200..=2299 => "serialization",
            3000..=3099 => "sync",
            4000..=4099 => "authentication",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, rejected commands)
    Low,
    /// Operational issues (transient storage, sync conflicts)
    Medium,
    /// System errors (serialization, configuration)
    High,
    /// Data integrity failures
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::UnknownCommand
            | ErrorCode::InvalidInput
            | ErrorCode::MissingIdempotencyKey
            | ErrorCode::TaskNotFound
            | ErrorCode::InvalidStateTransition
            | ErrorCode::SuggestionAlreadyResolved
            | ErrorCode::DuplicateRecord
            | ErrorCode::RemoteRejected
            | ErrorCode::Unauthorized => Self::Low,

            ErrorCode::StorageUnavailable
            | ErrorCode::StorageTransactionFailed
            | ErrorCode::NetworkError
            | ErrorCode::ReconciliationConflict => Self::Medium,

            ErrorCode::StorageError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration => Self::High,

            ErrorCode::CorruptEvent | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (task, suggestion, event...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Input field that failed validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.entity_id.is_none()
            && self.entity_type.is_none()
            && self.field.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the kernel.
#[derive(Error, Debug)]
pub struct KernelError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-safe error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl KernelError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a generic validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a validation error pinned to one input field.
    pub fn invalid_field(field: &str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message).with_details(ErrorDetails::new().with_field(field))
    }

    /// Create a not-found error for a task.
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self::new(ErrorCode::TaskNotFound, format!("task not found: {}", task_id))
            .with_details(ErrorDetails::new().with_entity("task", task_id))
    }

    /// Create a corrupt-event error for the event at `seq`.
    pub fn corrupt_event(seq: u64, internal: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::CorruptEvent,
            "An event in the log could not be decoded",
            internal,
        )
        .with_context("seq", seq)
    }

    /// Create a transient storage error.
    pub fn storage_unavailable(internal: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StorageUnavailable,
            "Event storage is temporarily unavailable",
            internal,
        )
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_validation(&self) -> bool {
        self.code.is_validation()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log at a level matching the severity. Only high and critical errors
    /// carry the internal message and source.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => error!(
                error_code = %code,
                category,
                severity = ?self.severity(),
                message = %self.user_message,
                internal = ?self.internal_message,
                source = ?self.source,
                details = ?self.details,
                "kernel error"
            ),
            ErrorSeverity::Medium => warn!(
                error_code = %code,
                category,
                message = %self.user_message,
                "kernel error"
            ),
            ErrorSeverity::Low => debug!(
                error_code = %code,
                category,
                message = %self.user_message,
                "command rejected"
            ),
        }
    }

    fn record_metrics(&self) {
        counter!(
            "lifeos_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response body for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&KernelError> for ErrorResponse {
    fn from(error: &KernelError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl From<ErrorResponse> for KernelError {
    /// Rebuild a kernel error from a response body returned by a remote kernel.
    fn from(response: ErrorResponse) -> Self {
        let mut error = KernelError::new(response.error.code, response.error.message);
        if let Some(details) = response.error.details {
            error.details = details;
        }
        error
    }
}

impl IntoResponse for KernelError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for KernelError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("idempotency") || constraint.contains("pkey") {
                        return Self::with_internal(
                            ErrorCode::DuplicateRecord,
                            "An event with this idempotency key already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                }
                (ErrorCode::StorageError, "A storage error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::StorageUnavailable,
                "Event storage is temporarily unavailable",
            ),
            _ => (ErrorCode::StorageError, "A storage error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<reqwest::Error> for KernelError {
    fn from(error: reqwest::Error) -> Self {
        let (code, user_msg) = if error.is_timeout() || error.is_connect() || error.is_request() {
            (ErrorCode::NetworkError, "Remote event log is unreachable")
        } else if let Some(status) = error.status() {
            if status.is_server_error() {
                (ErrorCode::StorageUnavailable, "Remote event log is temporarily unavailable")
            } else {
                (ErrorCode::RemoteRejected, "Remote event log rejected the request")
            }
        } else if error.is_decode() {
            (ErrorCode::DeserializationError, "Remote event log returned an unreadable response")
        } else {
            (ErrorCode::NetworkError, "Network error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for KernelError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                (ErrorCode::StorageUnavailable, "Local storage is temporarily unavailable")
            }
            _ => (ErrorCode::StorageError, "A local storage error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for KernelError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => {
                (ErrorCode::MissingConfiguration, "Required configuration not found")
            }
            _ => (ErrorCode::ConfigurationError, "Invalid configuration"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
