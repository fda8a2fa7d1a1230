//! Event definitions for the per-user life log.
//!
//! This module provides:
//! - Identifier newtypes (`UserId`, `EventId`, `TaskId`)
//! - The closed `EventKind` union and its payload structs
//! - `StoredEvent`, the storage/wire form (`type` + `metadata` JSON)
//! - `Event`, the decoded form the reducer folds over

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KernelError, Result};

// =============================================================================
// Identifiers
// =============================================================================

/// Owner of an event log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an appended event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-visible task identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The user's local calendar day at `now` for a UTC offset in minutes.
pub fn local_day(now: DateTime<Utc>, tz_offset_minutes: i32) -> NaiveDate {
    (now + chrono::Duration::minutes(tz_offset_minutes as i64)).date_naive()
}

/// Minutes since local midnight at `now`.
pub fn local_minute_of_day(now: DateTime<Utc>, tz_offset_minutes: i32) -> u32 {
    use chrono::Timelike;
    let local = now + chrono::Duration::minutes(tz_offset_minutes as i64);
    local.hour() * 60 + local.minute()
}

// =============================================================================
// Domain Events - Tasks
// =============================================================================

/// Event: a task entered the backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreated {
    pub task_id: TaskId,
    pub title: String,
    pub estimate_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<NaiveDate>,
}

/// Payload shared by task status events that only name the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub task_id: TaskId,
}

// =============================================================================
// Domain Events - Habits
// =============================================================================

/// Payload for habit check-ins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitCheck {
    pub habit_id: String,
}

// =============================================================================
// Domain Events - Calendar, Money, Plan
// =============================================================================

/// Event: a calendar block was placed on the day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalBlockAdded {
    pub block_id: String,
    /// Minutes since local midnight.
    pub start_minute: u32,
    pub duration_minutes: u32,
    #[serde(default)]
    pub title: String,
}

/// Event: money was spent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseAdded {
    pub category: String,
    pub amount_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Event: the user stated a plan for the day and monthly spend intents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSet {
    pub workday_start_minute: u32,
    pub workday_end_minute: u32,
    #[serde(default)]
    pub spend_intents: BTreeMap<String, i64>,
}

/// Event: momentum moved by a fixed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumAdjusted {
    pub delta: i32,
}

/// User verdict on a surfaced suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Ignored,
}

/// Event: the user accepted or ignored a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachingFeedback {
    pub suggestion_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_key: Option<String>,
    pub verdict: Verdict,
}

// =============================================================================
// Event Enumeration
// =============================================================================

/// Event type tags known to this build.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "TASK_CREATED",
    "TASK_COMPLETED",
    "TASK_PAUSED",
    "TASK_RESUMED",
    "TASK_DROPPED",
    "HABIT_DONE",
    "HABIT_MISSED",
    "CAL_BLOCK_ADDED",
    "EXPENSE_ADDED",
    "PLAN_SET",
    "MOMENTUM_ADJUSTED",
    "COACHING_FEEDBACK",
];

/// All life events, serialized as `{ "type": ..., "metadata": {...} }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "metadata", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TaskCreated(TaskCreated),
    TaskCompleted(TaskRef),
    TaskPaused(TaskRef),
    TaskResumed(TaskRef),
    TaskDropped(TaskRef),
    HabitDone(HabitCheck),
    HabitMissed(HabitCheck),
    CalBlockAdded(CalBlockAdded),
    ExpenseAdded(ExpenseAdded),
    PlanSet(PlanSet),
    MomentumAdjusted(MomentumAdjusted),
    CoachingFeedback(CoachingFeedback),

    /// A type written by a newer build. Never produced locally.
    #[serde(skip)]
    Unrecognized(String),
}

impl EventKind {
    /// The wire tag of this event.
    pub fn event_type(&self) -> &str {
        match self {
            EventKind::TaskCreated(_) => "TASK_CREATED",
            EventKind::TaskCompleted(_) => "TASK_COMPLETED",
            EventKind::TaskPaused(_) => "TASK_PAUSED",
            EventKind::TaskResumed(_) => "TASK_RESUMED",
            EventKind::TaskDropped(_) => "TASK_DROPPED",
            EventKind::HabitDone(_) => "HABIT_DONE",
            EventKind::HabitMissed(_) => "HABIT_MISSED",
            EventKind::CalBlockAdded(_) => "CAL_BLOCK_ADDED",
            EventKind::ExpenseAdded(_) => "EXPENSE_ADDED",
            EventKind::PlanSet(_) => "PLAN_SET",
            EventKind::MomentumAdjusted(_) => "MOMENTUM_ADJUSTED",
            EventKind::CoachingFeedback(_) => "COACHING_FEEDBACK",
            EventKind::Unrecognized(t) => t,
        }
    }

    /// Serialize the payload alone.
    pub fn metadata(&self) -> Result<serde_json::Value> {
        if let EventKind::Unrecognized(t) = self {
            return Err(KernelError::internal(format!(
                "refusing to write event of unrecognized type {}",
                t
            )));
        }
        let mut value = serde_json::to_value(self)?;
        Ok(value
            .get_mut("metadata")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Decode a `type` + `metadata` pair.
    ///
    /// Types outside [`KNOWN_EVENT_TYPES`] decode to `Unrecognized`; a known
    /// type with a malformed payload is an error.
    pub fn decode(
        event_type: &str,
        metadata: &serde_json::Value,
    ) -> std::result::Result<Self, serde_json::Error> {
        if !KNOWN_EVENT_TYPES.contains(&event_type) {
            return Ok(EventKind::Unrecognized(event_type.to_string()));
        }
        serde_json::from_value(serde_json::json!({
            "type": event_type,
            "metadata": metadata,
        }))
    }
}

// =============================================================================
// Stored / New / Decoded
// =============================================================================

/// An event as persisted and as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: EventId,
    pub user_id: UserId,
    /// Per-user insertion order, assigned by storage.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// The user's local calendar day at append time.
    pub day: NaiveDate,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub idempotency_key: String,
}

impl StoredEvent {
    pub fn to_ref(&self) -> EventRef {
        EventRef {
            id: self.id,
            seq: self.seq,
            idempotency_key: self.idempotency_key.clone(),
        }
    }

    /// Ordering key of the log: timestamp, then insertion order.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.seq)
    }
}

/// An event about to be appended. Storage assigns `id` and `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub day: NaiveDate,
    #[serde(rename = "type")]
    pub event_type: String,
    pub metadata: serde_json::Value,
    pub idempotency_key: String,
}

impl NewEvent {
    pub fn new(
        user_id: UserId,
        timestamp: DateTime<Utc>,
        day: NaiveDate,
        idempotency_key: impl Into<String>,
        kind: &EventKind,
    ) -> Result<Self> {
        Ok(Self {
            user_id,
            timestamp,
            day,
            event_type: kind.event_type().to_string(),
            metadata: kind.metadata()?,
            idempotency_key: idempotency_key.into(),
        })
    }

    /// Materialize with storage-assigned identity.
    pub fn into_stored(self, id: EventId, seq: u64) -> StoredEvent {
        StoredEvent {
            id,
            user_id: self.user_id,
            seq,
            timestamp: self.timestamp,
            day: self.day,
            event_type: self.event_type,
            metadata: self.metadata,
            idempotency_key: self.idempotency_key,
        }
    }
}

impl From<StoredEvent> for NewEvent {
    fn from(event: StoredEvent) -> Self {
        Self {
            user_id: event.user_id,
            timestamp: event.timestamp,
            day: event.day,
            event_type: event.event_type,
            metadata: event.metadata,
            idempotency_key: event.idempotency_key,
        }
    }
}

/// A decoded event, ready for the reducer.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub day: NaiveDate,
    pub idempotency_key: String,
    pub kind: EventKind,
}

impl Event {
    /// Decode a stored event. Fails closed with `CORRUPT_EVENT`.
    pub fn decode(stored: &StoredEvent) -> Result<Self> {
        let kind = EventKind::decode(&stored.event_type, &stored.metadata).map_err(|e| {
            KernelError::corrupt_event(
                stored.seq,
                format!("{} ({}): {}", stored.event_type, stored.idempotency_key, e),
            )
        })?;
        Ok(Self {
            id: stored.id,
            seq: stored.seq,
            timestamp: stored.timestamp,
            day: stored.day,
            idempotency_key: stored.idempotency_key.clone(),
            kind,
        })
    }
}

/// Handle to an appended event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRef {
    pub id: EventId,
    pub seq: u64,
    pub idempotency_key: String,
}

/// Result of an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// All events were written.
    Appended(Vec<EventRef>),
    /// The idempotency key was already present; nothing was written.
    Duplicate(Vec<EventRef>),
}

impl AppendOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    pub fn refs(&self) -> &[EventRef] {
        match self {
            Self::Appended(r) | Self::Duplicate(r) => r,
        }
    }
}

/// Filter for [`EventStorage::query`](super::EventStorage::query).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    /// Only events with `timestamp >= since`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Point lookup by idempotency key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl EventQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            idempotency_key: None,
        }
    }

    pub fn by_key(key: impl Into<String>) -> Self {
        Self {
            since: None,
            idempotency_key: Some(key.into()),
        }
    }

    pub fn matches(&self, event: &StoredEvent) -> bool {
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(ref key) = self.idempotency_key {
            if &event.idempotency_key != key {
                return false;
            }
        }
        true
    }
}
