//! Command Executor
//!
//! - **`command`**: wire `Command`, parsed `CommandIntent`, validation and event planning.
//! - **`executor`**: `CommandExecutor`, the idempotent command-to-event path.

pub mod command;
pub mod executor;

pub use command::{Command, CommandIntent, CommandOutcome, DERIVED_KEY_SEPARATOR, KNOWN_COMMANDS};
pub use executor::{resolve_tz_offset, CommandExecutor};
