//! `LifeState`: the derived point-in-time snapshot of one user's day.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::Aggregate;
use crate::events::{Event, EventKind, TaskId, Verdict};

/// Weight one task adds to, or removes from, backlog pressure.
pub const BACKLOG_WEIGHT: f64 = 1.0;

pub const INITIAL_MOMENTUM: i32 = 50;
pub const MOMENTUM_MIN: i32 = 0;
pub const MOMENTUM_MAX: i32 = 100;

/// Momentum below which the day is treated as recovery.
pub const RECOVERY_MOMENTUM: i32 = 30;

pub const DEFAULT_WORKDAY_START: u32 = 9 * 60;
pub const DEFAULT_WORKDAY_END: u32 = 17 * 60;
pub const MINUTES_PER_DAY: u32 = 24 * 60;

// =============================================================================
// Supporting Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Steady,
    Overloaded,
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Paused,
    Completed,
    Dropped,
}

impl TaskStatus {
    /// Still counts toward the backlog.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Open | TaskStatus::Paused)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub title: String,
    pub estimate_minutes: u32,
    pub scheduled_for: Option<NaiveDate>,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalBlock {
    pub block_id: String,
    pub start_minute: u32,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitTally {
    pub done: u32,
    pub missed: u32,
}

// =============================================================================
// LifeState
// =============================================================================

/// Snapshot derived by folding the log. Only the reducer mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifeState {
    pub day: NaiveDate,
    pub mode: Mode,
    /// `plannedMinutes / max(freeMinutes, 1)`
    pub load: f64,
    pub momentum: i32,
    /// Largest contiguous free stretch in the workday, in minutes.
    pub focus_capacity: u32,
    pub planned_minutes: u32,
    pub free_minutes: u32,
    /// Clamped to `[0, inf)`.
    pub backlog_pressure: f64,
    pub spend_vs_intent: BTreeMap<String, f64>,

    pub workday_start_minute: u32,
    pub workday_end_minute: u32,
    pub tasks: BTreeMap<TaskId, TaskRecord>,
    pub blocks: Vec<CalBlock>,
    pub completions: BTreeMap<NaiveDate, u32>,
    pub habits: BTreeMap<NaiveDate, HabitTally>,
    pub streak_breaks: u32,
    /// Spend for the calendar month of `day`, in cents.
    pub spent: BTreeMap<String, i64>,
    pub spend_intents: BTreeMap<String, i64>,
    /// First verdict recorded per suggestion id.
    pub feedback: BTreeMap<String, Verdict>,
    /// Events applied (dated on or before `day`).
    pub version: u64,
}

impl LifeState {
    /// Fresh state for `day`, before any event.
    pub fn initial(day: NaiveDate) -> Self {
        let mut state = Self {
            day,
            mode: Mode::Steady,
            load: 0.0,
            momentum: INITIAL_MOMENTUM,
            focus_capacity: 0,
            planned_minutes: 0,
            free_minutes: 0,
            backlog_pressure: 0.0,
            spend_vs_intent: BTreeMap::new(),
            workday_start_minute: DEFAULT_WORKDAY_START,
            workday_end_minute: DEFAULT_WORKDAY_END,
            tasks: BTreeMap::new(),
            blocks: Vec::new(),
            completions: BTreeMap::new(),
            habits: BTreeMap::new(),
            streak_breaks: 0,
            spent: BTreeMap::new(),
            spend_intents: BTreeMap::new(),
            feedback: BTreeMap::new(),
            version: 0,
        };
        state.recompute_calendar();
        state.derive();
        state
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    /// Number of open or paused tasks.
    pub fn backlog_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status.is_active()).count()
    }

    pub fn verdict(&self, suggestion_id: &str) -> Option<Verdict> {
        self.feedback.get(suggestion_id).copied()
    }

    fn release_planned(&mut self, record: &TaskRecord) {
        if record.scheduled_for == Some(self.day) {
            self.planned_minutes = self.planned_minutes.saturating_sub(record.estimate_minutes);
        }
    }

    fn relieve_backlog(&mut self) {
        self.backlog_pressure = (self.backlog_pressure - BACKLOG_WEIGHT).max(0.0);
    }

    /// Recompute free minutes and focus capacity from the workday and blocks.
    fn recompute_calendar(&mut self) {
        let start = self.workday_start_minute;
        let end = self.workday_end_minute.max(start);

        let mut spans: Vec<(u32, u32)> = self
            .blocks
            .iter()
            .map(|b| {
                let s = b.start_minute.clamp(start, end);
                let e = b.start_minute.saturating_add(b.duration_minutes).clamp(start, end);
                (s, e)
            })
            .filter(|(s, e)| e > s)
            .collect();
        spans.sort_unstable();

        let mut free = 0;
        let mut largest = 0;
        let mut cursor = start;
        for (s, e) in spans {
            if s > cursor {
                free += s - cursor;
                largest = largest.max(s - cursor);
            }
            cursor = cursor.max(e);
        }
        if end > cursor {
            free += end - cursor;
            largest = largest.max(end - cursor);
        }

        self.free_minutes = free;
        self.focus_capacity = largest;
    }

    fn derive(&mut self) {
        self.load = self.planned_minutes as f64 / self.free_minutes.max(1) as f64;

        self.spend_vs_intent = self
            .spend_intents
            .iter()
            .filter(|(_, intent)| **intent > 0)
            .map(|(category, intent)| {
                let spent = self.spent.get(category).copied().unwrap_or(0);
                (category.clone(), spent as f64 / *intent as f64)
            })
            .collect();

        self.mode = if self.load > 1.0 {
            Mode::Overloaded
        } else if self.momentum < RECOVERY_MOMENTUM {
            Mode::Recovery
        } else {
            Mode::Steady
        };
    }

    fn same_month(&self, day: NaiveDate) -> bool {
        day.year() == self.day.year() && day.month() == self.day.month()
    }
}

impl Aggregate for LifeState {
    fn apply(&mut self, event: &Event) {
        // Point-in-time: later days do not exist yet.
        if event.day > self.day {
            return;
        }
        self.version += 1;

        match &event.kind {
            EventKind::TaskCreated(e) => {
                if !self.tasks.contains_key(&e.task_id) {
                    let record = TaskRecord {
                        title: e.title.clone(),
                        estimate_minutes: e.estimate_minutes,
                        scheduled_for: e.scheduled_for,
                        status: TaskStatus::Open,
                    };
                    if record.scheduled_for == Some(self.day) {
                        self.planned_minutes = self.planned_minutes.saturating_add(record.estimate_minutes);
                    }
                    self.backlog_pressure += BACKLOG_WEIGHT;
                    self.tasks.insert(e.task_id.clone(), record);
                }
            }
            EventKind::TaskCompleted(e) => {
                if let Some(record) = self.tasks.get(&e.task_id).cloned() {
                    if record.status.is_active() {
                        self.release_planned(&record);
                        self.relieve_backlog();
                        let done = self.completions.entry(event.day).or_insert(0);
                        *done = done.saturating_add(1);
                        if let Some(task) = self.tasks.get_mut(&e.task_id) {
                            task.status = TaskStatus::Completed;
                        }
                    }
                }
            }
            EventKind::TaskPaused(e) => {
                if let Some(task) = self.tasks.get_mut(&e.task_id) {
                    if task.status == TaskStatus::Open {
                        task.status = TaskStatus::Paused;
                    }
                }
            }
            EventKind::TaskResumed(e) => {
                if let Some(task) = self.tasks.get_mut(&e.task_id) {
                    if task.status == TaskStatus::Paused {
                        task.status = TaskStatus::Open;
                    }
                }
            }
            EventKind::TaskDropped(e) => {
                if let Some(record) = self.tasks.get(&e.task_id).cloned() {
                    if record.status.is_active() {
                        self.release_planned(&record);
                        self.relieve_backlog();
                        if let Some(task) = self.tasks.get_mut(&e.task_id) {
                            task.status = TaskStatus::Dropped;
                        }
                    }
                }
            }
            EventKind::HabitDone(_) => {
                let tally = self.habits.entry(event.day).or_default();
                tally.done = tally.done.saturating_add(1);
            }
            EventKind::HabitMissed(_) => {
                let tally = self.habits.entry(event.day).or_default();
                tally.missed = tally.missed.saturating_add(1);
                self.streak_breaks = self.streak_breaks.saturating_add(1);
            }
            EventKind::CalBlockAdded(e) => {
                if event.day == self.day {
                    self.blocks.push(CalBlock {
                        block_id: e.block_id.clone(),
                        start_minute: e.start_minute,
                        duration_minutes: e.duration_minutes,
                    });
                    self.recompute_calendar();
                }
            }
            EventKind::ExpenseAdded(e) => {
                if self.same_month(event.day) {
                    let spent = self.spent.entry(e.category.clone()).or_insert(0);
                    *spent = spent.saturating_add(e.amount_cents);
                }
            }
            EventKind::PlanSet(e) => {
                self.spend_intents = e.spend_intents.clone();
                // A window that is empty or leaves the day keeps the previous one.
                let valid = e.workday_start_minute < e.workday_end_minute
                    && e.workday_end_minute <= MINUTES_PER_DAY;
                if event.day == self.day && valid {
                    self.workday_start_minute = e.workday_start_minute;
                    self.workday_end_minute = e.workday_end_minute;
                    self.recompute_calendar();
                }
            }
            EventKind::MomentumAdjusted(e) => {
                self.momentum = self.momentum.saturating_add(e.delta).clamp(MOMENTUM_MIN, MOMENTUM_MAX);
            }
            EventKind::CoachingFeedback(e) => {
                self.feedback.entry(e.suggestion_id.clone()).or_insert(e.verdict);
            }
            // Written by a newer build; forward-compatible ignore.
            EventKind::Unrecognized(_) => {}
        }

        self.derive();
    }
}
