//! Policy Engine
//!
//! Policies read a [`PolicyContext`] and return [`ProposedAction`]s; they
//! never write. [`run_policies`] merges their output through the cooldown
//! table and orders it for display.

pub mod builtin;
pub mod context;
pub mod cooldown;
pub mod registry;
pub mod suggestion;

pub use builtin::register_builtins;
pub use context::{PolicyContext, PolicyFacts};
pub use cooldown::{CooldownEntry, CooldownTable};
pub use registry::{run_policies, FnPolicy, Policy, PolicyRegistry};
pub use suggestion::{ProposedAction, Reason, SuggestionStatus, BASELINE_PRIORITY};
