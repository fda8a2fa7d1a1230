//! Event Log
//!
//! - **`event`**: identifiers, the closed `EventKind` union, stored and decoded forms.
//! - **`storage`**: the `EventStorage` collaborator trait and the in-memory backend.
//! - **`postgres`**: the sqlx/PostgreSQL backend.
//! - **`log`**: `EventLog`, which enforces batch and idempotency invariants.

pub mod event;
pub mod log;
pub mod postgres;
pub mod storage;

pub use event::*;
pub use log::EventLog;
pub use postgres::PgEventStorage;
pub use storage::{EventStorage, InMemoryEventStorage};
