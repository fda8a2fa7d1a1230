//! Commands: the unit of user intent.
//!
//! A [`Command`] is untyped on the wire (`cmd` + `input`). It is parsed into
//! a [`CommandIntent`] and then planned against the current state into the
//! events it would append.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ErrorCode, KernelError, Result};
use crate::events::{
    CalBlockAdded, CoachingFeedback, EventKind, EventRef, ExpenseAdded, HabitCheck,
    MomentumAdjusted, PlanSet, TaskCreated, TaskId, TaskRef, Verdict,
};
use crate::policy::SuggestionStatus;
use crate::reducer::{LifeState, TaskStatus, MINUTES_PER_DAY};

/// Momentum gained by finishing a task.
pub const COMPLETION_MOMENTUM: i32 = 5;
/// Momentum lost by missing a habit.
pub const MISSED_HABIT_MOMENTUM: i32 = -3;

/// Largest accepted UTC offset, in minutes (UTC+14).
pub const MAX_TZ_OFFSET_MINUTES: i32 = 14 * 60;

// =============================================================================
// Wire Types
// =============================================================================

/// A command as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub cmd: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz_offset_minutes: Option<i32>,
}

impl Command {
    pub fn new(cmd: impl Into<String>, input: serde_json::Value, idempotency_key: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            input,
            idempotency_key: idempotency_key.into(),
            tz_offset_minutes: None,
        }
    }

    pub fn with_tz_offset(mut self, minutes: i32) -> Self {
        self.tz_offset_minutes = Some(minutes);
        self
    }
}

/// Result of executing a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    /// Set when the idempotency key had already been applied.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deduped: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventRef>,
}

impl CommandOutcome {
    pub fn applied(events: Vec<EventRef>) -> Self {
        Self {
            success: true,
            deduped: false,
            events,
        }
    }

    pub fn deduped(events: Vec<EventRef>) -> Self {
        Self {
            success: true,
            deduped: true,
            events,
        }
    }
}

// =============================================================================
// Intents
// =============================================================================

/// Command names accepted by this build.
pub const KNOWN_COMMANDS: &[&str] = &[
    "create_task",
    "complete_task",
    "pause_task",
    "resume_task",
    "drop_task",
    "log_habit",
    "add_calendar_block",
    "add_expense",
    "set_plan",
    "accept_suggestion",
    "ignore_suggestion",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskInput {
    #[serde(default)]
    pub task_id: Option<TaskId>,
    pub title: String,
    pub estimate_minutes: u32,
    #[serde(default)]
    pub scheduled_for: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogHabitInput {
    pub habit_id: String,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarBlockInput {
    #[serde(default)]
    pub block_id: Option<String>,
    pub start_minute: u32,
    pub duration_minutes: u32,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseInput {
    pub category: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPlanInput {
    pub workday_start_minute: u32,
    pub workday_end_minute: u32,
    #[serde(default)]
    pub spend_intents: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionInput {
    pub suggestion_id: String,
    #[serde(default)]
    pub cooldown_key: Option<String>,
}

/// A parsed, well-typed command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", content = "input", rename_all = "snake_case")]
pub enum CommandIntent {
    CreateTask(CreateTaskInput),
    CompleteTask(TaskInput),
    PauseTask(TaskInput),
    ResumeTask(TaskInput),
    DropTask(TaskInput),
    LogHabit(LogHabitInput),
    AddCalendarBlock(CalendarBlockInput),
    AddExpense(ExpenseInput),
    SetPlan(SetPlanInput),
    AcceptSuggestion(SuggestionInput),
    IgnoreSuggestion(SuggestionInput),
}

impl CommandIntent {
    /// Parse `cmd` + `input`. Unknown names and ill-typed input are rejected.
    pub fn parse(command: &Command) -> Result<Self> {
        if !KNOWN_COMMANDS.contains(&command.cmd.as_str()) {
            return Err(KernelError::new(
                ErrorCode::UnknownCommand,
                format!("unknown command: {}", command.cmd),
            ));
        }
        serde_json::from_value(serde_json::json!({
            "cmd": command.cmd,
            "input": command.input,
        }))
        .map_err(|e| {
            KernelError::new(
                ErrorCode::InvalidInput,
                format!("invalid input for {}: {}", command.cmd, e),
            )
        })
    }

    /// Validate against `state` and map to the events to append, in order.
    ///
    /// `key` seeds ids the caller left out, so a retried command plans the
    /// same events.
    pub fn plan(&self, state: &LifeState, key: &str) -> Result<Vec<EventKind>> {
        match self {
            CommandIntent::CreateTask(input) => {
                let title = input.title.trim();
                if title.is_empty() {
                    return Err(KernelError::invalid_field("title", "title must not be empty"));
                }
                if input.estimate_minutes == 0 || input.estimate_minutes > MINUTES_PER_DAY {
                    return Err(KernelError::invalid_field(
                        "estimateMinutes",
                        "estimate must be between 1 and 1440 minutes",
                    ));
                }
                let task_id = input
                    .task_id
                    .clone()
                    .unwrap_or_else(|| TaskId::new(derive_id("task", key)));
                if state.task(&task_id).is_some() {
                    return Err(KernelError::new(
                        ErrorCode::InvalidStateTransition,
                        format!("task {} already exists", task_id),
                    ));
                }
                Ok(vec![EventKind::TaskCreated(TaskCreated {
                    task_id,
                    title: title.to_string(),
                    estimate_minutes: input.estimate_minutes,
                    scheduled_for: input.scheduled_for,
                })])
            }
            CommandIntent::CompleteTask(input) => {
                require_task(state, &input.task_id, TaskStatus::is_active, "complete")?;
                Ok(vec![
                    EventKind::TaskCompleted(TaskRef {
                        task_id: input.task_id.clone(),
                    }),
                    EventKind::MomentumAdjusted(MomentumAdjusted {
                        delta: COMPLETION_MOMENTUM,
                    }),
                ])
            }
            CommandIntent::PauseTask(input) => {
                require_task(state, &input.task_id, |s| *s == TaskStatus::Open, "pause")?;
                Ok(vec![EventKind::TaskPaused(TaskRef {
                    task_id: input.task_id.clone(),
                })])
            }
            CommandIntent::ResumeTask(input) => {
                require_task(state, &input.task_id, |s| *s == TaskStatus::Paused, "resume")?;
                Ok(vec![EventKind::TaskResumed(TaskRef {
                    task_id: input.task_id.clone(),
                })])
            }
            CommandIntent::DropTask(input) => {
                require_task(state, &input.task_id, TaskStatus::is_active, "drop")?;
                Ok(vec![EventKind::TaskDropped(TaskRef {
                    task_id: input.task_id.clone(),
                })])
            }
            CommandIntent::LogHabit(input) => {
                let habit_id = input.habit_id.trim();
                if habit_id.is_empty() {
                    return Err(KernelError::invalid_field("habitId", "habitId must not be empty"));
                }
                let check = HabitCheck {
                    habit_id: habit_id.to_string(),
                };
                if input.done {
                    Ok(vec![EventKind::HabitDone(check)])
                } else {
                    Ok(vec![
                        EventKind::HabitMissed(check),
                        EventKind::MomentumAdjusted(MomentumAdjusted {
                            delta: MISSED_HABIT_MOMENTUM,
                        }),
                    ])
                }
            }
            CommandIntent::AddCalendarBlock(input) => {
                if input.duration_minutes == 0 {
                    return Err(KernelError::invalid_field(
                        "durationMinutes",
                        "duration must be positive",
                    ));
                }
                if input.start_minute >= MINUTES_PER_DAY
                    || input.start_minute.saturating_add(input.duration_minutes) > MINUTES_PER_DAY
                {
                    return Err(KernelError::invalid_field(
                        "startMinute",
                        "block must fit inside the day",
                    ));
                }
                Ok(vec![EventKind::CalBlockAdded(CalBlockAdded {
                    block_id: input
                        .block_id
                        .clone()
                        .unwrap_or_else(|| derive_id("block", key)),
                    start_minute: input.start_minute,
                    duration_minutes: input.duration_minutes,
                    title: input.title.clone(),
                })])
            }
            CommandIntent::AddExpense(input) => {
                let category = input.category.trim();
                if category.is_empty() {
                    return Err(KernelError::invalid_field("category", "category must not be empty"));
                }
                if input.amount_cents <= 0 {
                    return Err(KernelError::invalid_field("amountCents", "amount must be positive"));
                }
                Ok(vec![EventKind::ExpenseAdded(ExpenseAdded {
                    category: category.to_string(),
                    amount_cents: input.amount_cents,
                    note: input.note.clone(),
                })])
            }
            CommandIntent::SetPlan(input) => {
                if input.workday_start_minute >= input.workday_end_minute
                    || input.workday_end_minute > MINUTES_PER_DAY
                {
                    return Err(KernelError::invalid_field(
                        "workdayStartMinute",
                        "workday must start before it ends, within the day",
                    ));
                }
                if let Some((category, _)) = input.spend_intents.iter().find(|(_, v)| **v < 0) {
                    return Err(KernelError::invalid_field(
                        "spendIntents",
                        format!("intent for {} must not be negative", category),
                    ));
                }
                Ok(vec![EventKind::PlanSet(PlanSet {
                    workday_start_minute: input.workday_start_minute,
                    workday_end_minute: input.workday_end_minute,
                    spend_intents: input.spend_intents.clone(),
                })])
            }
            CommandIntent::AcceptSuggestion(input) => feedback(state, input, Verdict::Accepted),
            CommandIntent::IgnoreSuggestion(input) => feedback(state, input, Verdict::Ignored),
        }
    }
}

fn require_task(
    state: &LifeState,
    task_id: &TaskId,
    allowed: impl Fn(&TaskStatus) -> bool,
    action: &str,
) -> Result<()> {
    let task = state
        .task(task_id)
        .ok_or_else(|| KernelError::task_not_found(task_id.as_str()))?;
    if !allowed(&task.status) {
        return Err(KernelError::new(
            ErrorCode::InvalidStateTransition,
            format!("cannot {} task {} while it is {:?}", action, task_id, task.status),
        ));
    }
    Ok(())
}

fn feedback(state: &LifeState, input: &SuggestionInput, verdict: Verdict) -> Result<Vec<EventKind>> {
    if input.suggestion_id.trim().is_empty() {
        return Err(KernelError::invalid_field(
            "suggestionId",
            "suggestionId must not be empty",
        ));
    }
    let current = state
        .verdict(&input.suggestion_id)
        .map(SuggestionStatus::from)
        .unwrap_or(SuggestionStatus::Pending);
    current.transition(verdict.into())?;

    Ok(vec![EventKind::CoachingFeedback(CoachingFeedback {
        suggestion_id: input.suggestion_id.clone(),
        cooldown_key: input.cooldown_key.clone(),
        verdict,
    })])
}

/// Short deterministic id derived from an idempotency key.
pub fn derive_id(prefix: &str, key: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}_{}", prefix, &digest[..12])
}

/// Separates a command key from the index of a follow-on event. Reserved:
/// caller keys may not contain it.
pub const DERIVED_KEY_SEPARATOR: char = '#';

/// Idempotency key of the `index`-th event of a command keyed `key`.
pub fn event_key(key: &str, index: usize) -> String {
    if index == 0 {
        key.to_string()
    } else {
        format!("{}{}{}", key, DERIVED_KEY_SEPARATOR, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> LifeState {
        LifeState::initial(NaiveDate::from_ymd_opt(2026, 6, 1).unwrap())
    }

    #[test]
    fn test_parse_known_command() {
        let cmd = Command::new("log_habit", json!({ "habitId": "walk", "done": true }), "k1");
        let intent = CommandIntent::parse(&cmd).unwrap();
        assert!(matches!(intent, CommandIntent::LogHabit(LogHabitInput { done: true, .. })));
    }

    #[test]
    fn test_parse_unknown_and_malformed() {
        let err = CommandIntent::parse(&Command::new("teleport", json!({}), "k")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownCommand);

        let err = CommandIntent::parse(&Command::new("complete_task", json!({ "task": 1 }), "k"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd: Command = serde_json::from_value(json!({
            "cmd": "add_expense",
            "input": { "category": "food", "amountCents": 1250 },
            "idempotencyKey": "web:1:abc",
            "tzOffsetMinutes": -300,
        }))
        .unwrap();
        assert_eq!(cmd.idempotency_key, "web:1:abc");
        assert_eq!(cmd.tz_offset_minutes, Some(-300));
    }

    #[test]
    fn test_create_task_derives_stable_id() {
        let intent = CommandIntent::CreateTask(CreateTaskInput {
            task_id: None,
            title: "  Call bank ".into(),
            estimate_minutes: 15,
            scheduled_for: None,
        });
        let a = intent.plan(&state(), "key-1").unwrap();
        let b = intent.plan(&state(), "key-1").unwrap();
        assert_eq!(a, b);
        match &a[0] {
            EventKind::TaskCreated(e) => {
                assert!(e.task_id.as_str().starts_with("task_"));
                assert_eq!(e.title, "Call bank");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_complete_requires_existing_task() {
        let intent = CommandIntent::CompleteTask(TaskInput { task_id: TaskId::new("nope") });
        let err = intent.plan(&state(), "k").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TaskNotFound);
    }

    #[test]
    fn test_missed_habit_costs_momentum() {
        let intent = CommandIntent::LogHabit(LogHabitInput {
            habit_id: "gym".into(),
            done: false,
        });
        let events = intent.plan(&state(), "k").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            EventKind::MomentumAdjusted(MomentumAdjusted { delta: MISSED_HABIT_MOMENTUM })
        );
    }

    #[test]
    fn test_rejects_out_of_range_input() {
        let block = CommandIntent::AddCalendarBlock(CalendarBlockInput {
            block_id: None,
            start_minute: 1400,
            duration_minutes: 60,
            title: String::new(),
        });
        assert_eq!(block.plan(&state(), "k").unwrap_err().code(), ErrorCode::InvalidInput);

        let plan = CommandIntent::SetPlan(SetPlanInput {
            workday_start_minute: 600,
            workday_end_minute: 600,
            spend_intents: BTreeMap::new(),
        });
        assert!(plan.plan(&state(), "k").is_err());

        let expense = CommandIntent::AddExpense(ExpenseInput {
            category: "food".into(),
            amount_cents: 0,
            note: None,
        });
        assert!(expense.plan(&state(), "k").is_err());
    }

    #[test]
    fn test_suggestion_resolved_once() {
        let mut s = state();
        s.feedback.insert("sg_1".into(), Verdict::Ignored);
        let intent = CommandIntent::AcceptSuggestion(SuggestionInput {
            suggestion_id: "sg_1".into(),
            cooldown_key: None,
        });
        let err = intent.plan(&s, "k").unwrap_err();
        assert_eq!(err.code(), ErrorCode::SuggestionAlreadyResolved);
    }

    #[test]
    fn test_event_keys() {
        assert_eq!(event_key("abc", 0), "abc");
        assert_eq!(event_key("abc", 2), "abc#2");
    }
}
