#![allow(clippy::result_large_err)]
//! # LifeOS Core
//!
//! Event-sourcing kernel for personal life management.
//!
//! ## Architecture
//!
//! - **Event Log**: append-only, idempotency-keyed per user
//! - **Reducer**: deterministic fold of events into a day's `LifeState`
//! - **Policy Engine**: pure policies proposing suggestions, deduplicated by cooldown
//! - **Command Executor**: validates commands and turns them into events
//! - **Local-First**: optimistic local mirror and outbox reconciled with the remote log
//! - **Telemetry**: structured logging, OTLP tracing and Prometheus metrics

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod kernel;
pub mod local;
pub mod policy;
pub mod reducer;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, KernelError, Result};
pub use kernel::{Kernel, TodayView};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::commands::{Command, CommandOutcome};
    pub use crate::error::{ErrorCode, KernelError, Result};
    pub use crate::events::{Event, EventKind, EventLog, EventQuery, StoredEvent, UserId};
    pub use crate::kernel::{Kernel, TodayView};
    pub use crate::local::{
        FileLocalStore, HttpRemote, InMemoryLocalStore, InProcessRemote, LocalFirstClient,
        ReconcileReport, Reconciler, RemoteLog,
    };
    pub use crate::policy::{Policy, PolicyRegistry, ProposedAction};
    pub use crate::reducer::{replay, LifeState, Mode};
}
