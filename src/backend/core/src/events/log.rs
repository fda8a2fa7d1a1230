//! The event log: invariants on top of a storage collaborator.

use std::sync::Arc;

use tracing::{info, instrument};

use super::event::{AppendOutcome, Event, EventQuery, NewEvent, StoredEvent, UserId};
use super::storage::{duplicate_keys, EventStorage, InMemoryEventStorage};
use crate::error::{ErrorCode, KernelError, Result};
use crate::telemetry::metrics;

/// Append-only, per-user event log.
///
/// This is the only deduplication boundary in the system: a batch whose key
/// was already committed is a no-op that reports the existing events.
#[derive(Clone)]
pub struct EventLog {
    storage: Arc<dyn EventStorage>,
}

impl EventLog {
    pub fn new(storage: Arc<dyn EventStorage>) -> Self {
        Self { storage }
    }

    /// Log backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEventStorage::new()))
    }

    pub fn storage(&self) -> &Arc<dyn EventStorage> {
        &self.storage
    }

    /// Append a single event.
    pub async fn append(&self, event: NewEvent) -> Result<AppendOutcome> {
        let user = event.user_id.clone();
        self.append_batch(&user, vec![event]).await
    }

    /// Append events produced by one command, all or nothing.
    #[instrument(skip(self, events), fields(user_id = %user, backend = self.storage.name()))]
    pub async fn append_batch(&self, user: &UserId, events: Vec<NewEvent>) -> Result<AppendOutcome> {
        if events.is_empty() {
            return Err(KernelError::validation("cannot append an empty batch"));
        }
        if let Some(event) = events.iter().find(|e| e.idempotency_key.trim().is_empty()) {
            return Err(KernelError::new(
                ErrorCode::MissingIdempotencyKey,
                format!("event {} has no idempotency key", event.event_type),
            ));
        }
        if events.iter().any(|e| &e.user_id != user) {
            return Err(KernelError::validation("batch mixes events from several users"));
        }
        if let Some(key) = duplicate_keys(&events).into_iter().next() {
            return Err(KernelError::validation(format!(
                "idempotency key {} repeated within one batch",
                key
            )));
        }

        let count = events.len();
        let outcome = self.storage.append_batch(user, events).await?;
        if let AppendOutcome::Appended(ref refs) = outcome {
            metrics::record_events_appended(count);
            info!(first_seq = refs.first().map(|r| r.seq), count, "Events appended");
        }
        Ok(outcome)
    }

    /// Ordered events for `user`.
    pub async fn query(&self, user: &UserId, query: &EventQuery) -> Result<Vec<StoredEvent>> {
        self.storage.query(user, query).await
    }

    pub async fn find_by_key(&self, user: &UserId, key: &str) -> Result<Option<StoredEvent>> {
        self.storage.find_by_key(user, key).await
    }

    /// Load and decode the full log. Any undecodable event fails the load.
    pub async fn load(&self, user: &UserId) -> Result<Vec<Event>> {
        let stored = self.query(user, &EventQuery::all()).await?;
        stored.iter().map(Event::decode).collect()
    }
}
