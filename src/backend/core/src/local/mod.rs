//! Local-first cache and outbox.
//!
//! The client applies commands to a local mirror of the event log first and
//! queues them for the remote. A [`Reconciler`] drains the queue; the remote
//! log wins every disagreement.

pub mod client;
pub mod outbox;
pub mod reconciler;
pub mod remote;
pub mod retry;
pub mod store;

pub use client::{ClientConfig, LocalFirstClient, ReconcileReport, Rejection};
pub use outbox::{Outbox, OutboxEntry};
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerHandle};
pub use remote::{HttpRemote, InProcessRemote, RemoteLog, SubmitRequest, USER_HEADER};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{FileLocalStore, InMemoryLocalStore, LocalStore};
