//! Outbox: commands applied locally but not yet acknowledged remotely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::{load_json, save_json, LocalStore};
use crate::commands::Command;
use crate::error::Result;
use crate::events::{StoredEvent, UserId};
use crate::telemetry::metrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub command: Command,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Optimistic events this command produced in the local mirror.
    #[serde(default)]
    pub local_events: Vec<StoredEvent>,
}

impl OutboxEntry {
    pub fn new(command: Command, enqueued_at: DateTime<Utc>, local_events: Vec<StoredEvent>) -> Self {
        Self {
            command,
            enqueued_at,
            attempts: 0,
            last_error: None,
            local_events,
        }
    }

    pub fn key(&self) -> &str {
        &self.command.idempotency_key
    }
}

/// FIFO of pending entries for one user, persisted as one document.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    entries: Vec<OutboxEntry>,
}

impl Outbox {
    pub fn store_key(user: &UserId) -> String {
        format!("outbox/{}", user)
    }

    pub async fn load(store: &dyn LocalStore, user: &UserId) -> Result<Self> {
        let entries = load_json(store, &Self::store_key(user))
            .await?
            .unwrap_or_default();
        Ok(Self { entries })
    }

    pub async fn save(&self, store: &dyn LocalStore, user: &UserId) -> Result<()> {
        metrics::set_outbox_depth(self.entries.len());
        save_json(store, &Self::store_key(user), &self.entries).await
    }

    pub fn push(&mut self, entry: OutboxEntry) {
        self.entries.push(entry);
    }

    pub fn front(&self) -> Option<&OutboxEntry> {
        self.entries.first()
    }

    pub fn front_mut(&mut self) -> Option<&mut OutboxEntry> {
        self.entries.first_mut()
    }

    pub fn pop_front(&mut self) -> Option<OutboxEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn entries(&self) -> &[OutboxEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
