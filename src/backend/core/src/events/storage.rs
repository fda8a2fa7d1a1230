//! Event storage collaborators.
//!
//! [`EventStorage`] is the seam between the log invariants and physical
//! persistence. Implementations must make `append_batch` all-or-nothing and
//! enforce uniqueness on `(user_id, idempotency_key)`.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};

use super::event::{AppendOutcome, EventId, EventQuery, EventRef, NewEvent, StoredEvent, UserId};
use crate::error::Result;

/// Durable per-user event storage.
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Atomically append a batch for one user.
    ///
    /// If any key in the batch already exists nothing is written and the
    /// existing events for the batch's keys are returned as a duplicate.
    async fn append_batch(&self, user: &UserId, events: Vec<NewEvent>) -> Result<AppendOutcome>;

    /// Events for `user` matching `query`, ordered by `(timestamp, seq)`.
    async fn query(&self, user: &UserId, query: &EventQuery) -> Result<Vec<StoredEvent>>;

    /// Point lookup by idempotency key.
    async fn find_by_key(&self, user: &UserId, key: &str) -> Result<Option<StoredEvent>> {
        let mut found = self.query(user, &EventQuery::by_key(key)).await?;
        Ok(found.pop())
    }

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Storage
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct UserLog {
    events: Vec<StoredEvent>,
    next_seq: u64,
}

impl UserLog {
    fn find(&self, key: &str) -> Option<&StoredEvent> {
        self.events.iter().find(|e| e.idempotency_key == key)
    }
}

/// In-process storage. Each user's log sits behind its own map entry lock,
/// which serializes appends per user.
#[derive(Debug, Default)]
pub struct InMemoryEventStorage {
    logs: DashMap<UserId, UserLog>,
}

impl InMemoryEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a user's log wholesale, keeping the given `seq` values.
    ///
    /// Used to mirror an authoritative remote sequence locally.
    pub fn replace_user(&self, user: &UserId, events: Vec<StoredEvent>) {
        let next_seq = events.iter().map(|e| e.seq).max().unwrap_or(0) + 1;
        self.logs.insert(user.clone(), UserLog { events, next_seq });
    }

    /// Number of events stored for `user`.
    pub fn len(&self, user: &UserId) -> usize {
        self.logs.get(user).map(|log| log.events.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    #[instrument(skip(self, events), fields(user_id = %user, count = events.len()))]
    async fn append_batch(&self, user: &UserId, events: Vec<NewEvent>) -> Result<AppendOutcome> {
        let mut log = self.logs.entry(user.clone()).or_insert_with(|| UserLog {
            events: Vec::new(),
            next_seq: 1,
        });

        let existing: Vec<EventRef> = events
            .iter()
            .filter_map(|e| log.find(&e.idempotency_key).map(StoredEvent::to_ref))
            .collect();
        if !existing.is_empty() {
            debug!(key = %existing[0].idempotency_key, "Duplicate idempotency key");
            return Ok(AppendOutcome::Duplicate(existing));
        }

        let mut refs = Vec::with_capacity(events.len());
        for event in events {
            let seq = log.next_seq;
            log.next_seq += 1;
            let stored = event.into_stored(EventId::new(), seq);
            refs.push(stored.to_ref());
            log.events.push(stored);
        }

        Ok(AppendOutcome::Appended(refs))
    }

    async fn query(&self, user: &UserId, query: &EventQuery) -> Result<Vec<StoredEvent>> {
        let Some(log) = self.logs.get(user) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<StoredEvent> = log
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        out.sort_by_key(StoredEvent::order_key);
        Ok(out)
    }

    async fn find_by_key(&self, user: &UserId, key: &str) -> Result<Option<StoredEvent>> {
        Ok(self
            .logs
            .get(user)
            .and_then(|log| log.find(key).cloned()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Keys in `events` that appear more than once.
pub(crate) fn duplicate_keys(events: &[NewEvent]) -> Vec<String> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| !seen.insert(e.idempotency_key.as_str()))
        .map(|e| e.idempotency_key.clone())
        .collect()
}
