//! Built-in policies. Each encodes a single behavioral heuristic.

use std::sync::Arc;

use serde_json::json;

use super::context::PolicyContext;
use super::registry::{Policy, PolicyRegistry, DEFAULT_COOLDOWN_HOURS};
use super::suggestion::ProposedAction;
use crate::config::PolicyThresholds;
use crate::reducer::TaskStatus;

pub const OVERLOAD_GUARD: &str = "overload_guard";
pub const MOMENTUM_BUILDER: &str = "momentum_builder";
pub const FOCUS_PROTECTION: &str = "focus_protection";
pub const HABIT_DOWNSHIFT: &str = "habit_downshift";
pub const FINANCIAL_DRIFT_WATCH: &str = "financial_drift_watch";
pub const END_OF_DAY_REVIEW: &str = "end_of_day_review";
pub const BACKLOG_PRESSURE_VALVE: &str = "backlog_pressure_valve";

/// Register every built-in policy. Already registered names are skipped.
pub fn register_builtins(registry: &PolicyRegistry, thresholds: &PolicyThresholds) {
    let t = thresholds.clone();
    let cooldown = to_chrono(thresholds.cooldown);
    let policies: Vec<Arc<dyn Policy>> = vec![
        Arc::new(OverloadGuard { t: t.clone(), cooldown }),
        Arc::new(MomentumBuilder { t: t.clone(), cooldown }),
        Arc::new(FocusProtection { t: t.clone(), cooldown }),
        Arc::new(HabitDownshift { t: t.clone(), cooldown }),
        Arc::new(FinancialDriftWatch { t: t.clone(), cooldown }),
        Arc::new(EndOfDayReview {
            cooldown: to_chrono(t.review_cooldown),
            t: t.clone(),
        }),
        Arc::new(BacklogPressureValve { t, cooldown }),
    ];
    for policy in policies {
        registry.register(policy);
    }
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::hours(DEFAULT_COOLDOWN_HOURS))
}

// ─────────────────────────────────────────────────────────────────────────────
// Overload Guard
// ─────────────────────────────────────────────────────────────────────────────

/// Planned work exceeds free time by more than the margin.
pub struct OverloadGuard {
    t: PolicyThresholds,
    cooldown: chrono::Duration,
}

impl Policy for OverloadGuard {
    fn name(&self) -> &str {
        OVERLOAD_GUARD
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Vec<ProposedAction> {
        let state = &ctx.state;
        if state.planned_minutes <= state.free_minutes + self.t.overload_margin_minutes {
            return vec![];
        }
        let overflow = state.planned_minutes - state.free_minutes;
        vec![ProposedAction::new(OVERLOAD_GUARD, "reschedule_overflow", 80, ctx.day())
            .with_reason(
                "PLANNED_EXCEEDS_FREE",
                format!(
                    "{} minutes planned against {} free",
                    state.planned_minutes, state.free_minutes
                ),
            )
            .with_payload(json!({ "overflowMinutes": overflow }))
            .with_cooldown_key(format!("overload:{}", ctx.day()))]
    }

    fn cooldown(&self) -> chrono::Duration {
        self.cooldown
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Momentum Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Few completions lately while work is waiting: offer the smallest task.
pub struct MomentumBuilder {
    t: PolicyThresholds,
    cooldown: chrono::Duration,
}

impl Policy for MomentumBuilder {
    fn name(&self) -> &str {
        MOMENTUM_BUILDER
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Vec<ProposedAction> {
        if ctx.facts.completed_last_3_days >= self.t.min_completions_3_days {
            return vec![];
        }
        let quick_win = ctx
            .state
            .tasks
            .iter()
            .filter(|(_, task)| task.status == TaskStatus::Open)
            .min_by_key(|(id, task)| (task.estimate_minutes, (*id).clone()));
        let Some((task_id, task)) = quick_win else {
            return vec![];
        };

        vec![ProposedAction::new(MOMENTUM_BUILDER, "quick_win", 60, ctx.day())
            .with_reason(
                "LOW_RECENT_COMPLETION",
                format!(
                    "{} task(s) completed in the last 3 days",
                    ctx.facts.completed_last_3_days
                ),
            )
            .with_payload(json!({
                "taskId": task_id,
                "title": task.title,
                "estimateMinutes": task.estimate_minutes,
            }))
            .with_cooldown_key(format!("momentum:{}", ctx.day()))]
    }

    fn cooldown(&self) -> chrono::Duration {
        self.cooldown
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Focus Protection
// ─────────────────────────────────────────────────────────────────────────────

/// Enough free time in total, but no single stretch long enough to focus.
pub struct FocusProtection {
    t: PolicyThresholds,
    cooldown: chrono::Duration,
}

impl Policy for FocusProtection {
    fn name(&self) -> &str {
        FOCUS_PROTECTION
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Vec<ProposedAction> {
        let state = &ctx.state;
        let block = self.t.focus_block_minutes;
        if state.focus_capacity >= block || state.free_minutes < block {
            return vec![];
        }
        vec![ProposedAction::new(FOCUS_PROTECTION, "protect_focus_block", 65, ctx.day())
            .with_reason(
                "FRAGMENTED_DAY",
                format!(
                    "longest free stretch is {} minutes, {} needed",
                    state.focus_capacity, block
                ),
            )
            .with_payload(json!({
                "focusCapacity": state.focus_capacity,
                "freeMinutes": state.free_minutes,
                "blockMinutes": block,
            }))
            .with_cooldown_key(format!("focus:{}", ctx.day()))]
    }

    fn cooldown(&self) -> chrono::Duration {
        self.cooldown
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Habit Downshift
// ─────────────────────────────────────────────────────────────────────────────

/// Weekly habit completion under the floor: make habits smaller.
pub struct HabitDownshift {
    t: PolicyThresholds,
    cooldown: chrono::Duration,
}

impl Policy for HabitDownshift {
    fn name(&self) -> &str {
        HABIT_DOWNSHIFT
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Vec<ProposedAction> {
        let Some(ratio) = ctx.facts.habit_completion_7_days else {
            return vec![];
        };
        if ratio >= self.t.habit_completion_floor {
            return vec![];
        }
        vec![ProposedAction::new(HABIT_DOWNSHIFT, "downshift_habits", 70, ctx.day())
            .with_reason(
                "LOW_HABIT_COMPLETION",
                format!("{:.0}% of habits kept over 7 days", ratio * 100.0),
            )
            .with_payload(json!({
                "ratio": ratio,
                "done": ctx.facts.habit_done_7_days,
                "missed": ctx.facts.habit_missed_7_days,
            }))
            .with_cooldown_key("habits:downshift")]
    }

    fn cooldown(&self) -> chrono::Duration {
        self.cooldown
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Financial Drift Watch
// ─────────────────────────────────────────────────────────────────────────────

/// One suggestion per category spending past its monthly intent.
pub struct FinancialDriftWatch {
    t: PolicyThresholds,
    cooldown: chrono::Duration,
}

impl Policy for FinancialDriftWatch {
    fn name(&self) -> &str {
        FINANCIAL_DRIFT_WATCH
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Vec<ProposedAction> {
        ctx.state
            .spend_vs_intent
            .iter()
            .filter(|(_, ratio)| **ratio > self.t.spend_drift_ratio)
            .map(|(category, ratio)| {
                ProposedAction::new(FINANCIAL_DRIFT_WATCH, "review_spending", 55, ctx.day())
                    .with_reason(
                        "SPEND_OVER_INTENT",
                        format!("{} is at {:.0}% of intent", category, ratio * 100.0),
                    )
                    .with_payload(json!({ "category": category, "ratio": ratio }))
                    .with_cooldown_key(format!("spend:{}", category))
            })
            .collect()
    }

    fn cooldown(&self) -> chrono::Duration {
        self.cooldown
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// End-of-Day Review
// ─────────────────────────────────────────────────────────────────────────────

/// Late in the local day: offer a short review.
pub struct EndOfDayReview {
    t: PolicyThresholds,
    cooldown: chrono::Duration,
}

impl Policy for EndOfDayReview {
    fn name(&self) -> &str {
        END_OF_DAY_REVIEW
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Vec<ProposedAction> {
        if ctx.facts.local_minute_of_day < self.t.review_after_minute {
            return vec![];
        }
        vec![ProposedAction::new(END_OF_DAY_REVIEW, "daily_review", 40, ctx.day())
            .with_reason("END_OF_DAY", "the workday is over")
            .with_payload(json!({
                "completedToday": ctx.facts.completed_today,
                "backlogCount": ctx.facts.backlog_count,
            }))
            .with_cooldown_key(format!("review:{}", ctx.day()))]
    }

    fn cooldown(&self) -> chrono::Duration {
        self.cooldown
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backlog Pressure Valve
// ─────────────────────────────────────────────────────────────────────────────

/// Too much open work: propose dropping or deferring unscheduled tasks.
pub struct BacklogPressureValve {
    t: PolicyThresholds,
    cooldown: chrono::Duration,
}

/// Tasks named in a valve suggestion.
const VALVE_CANDIDATES: usize = 3;

impl Policy for BacklogPressureValve {
    fn name(&self) -> &str {
        BACKLOG_PRESSURE_VALVE
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Vec<ProposedAction> {
        if ctx.state.backlog_pressure < self.t.backlog_pressure_limit {
            return vec![];
        }
        let candidates: Vec<_> = ctx
            .state
            .tasks
            .iter()
            .filter(|(_, task)| task.status.is_active() && task.scheduled_for.is_none())
            .take(VALVE_CANDIDATES)
            .map(|(id, _)| id.clone())
            .collect();

        vec![ProposedAction::new(BACKLOG_PRESSURE_VALVE, "trim_backlog", 50, ctx.day())
            .with_reason(
                "BACKLOG_PRESSURE",
                format!("backlog pressure is {:.1}", ctx.state.backlog_pressure),
            )
            .with_payload(json!({
                "backlogCount": ctx.facts.backlog_count,
                "candidates": candidates,
            }))
            .with_cooldown_key("backlog:valve")]
    }

    fn cooldown(&self) -> chrono::Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::{LifeState, TaskRecord};
    use crate::events::TaskId;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()
    }

    fn ctx_with(state: LifeState, hour: u32) -> PolicyContext {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, hour, 0, 0).unwrap();
        PolicyContext::build(state, Vec::new(), now, 0)
    }

    fn open_task(estimate: u32, scheduled_for: Option<NaiveDate>) -> TaskRecord {
        TaskRecord {
            title: "t".into(),
            estimate_minutes: estimate,
            scheduled_for,
            status: TaskStatus::Open,
        }
    }

    #[test]
    fn test_register_builtins_is_idempotent() {
        let registry = PolicyRegistry::new();
        register_builtins(&registry, &PolicyThresholds::default());
        register_builtins(&registry, &PolicyThresholds::default());
        assert_eq!(registry.len(), 7);
    }

    #[test]
    fn test_overload_guard_respects_margin() {
        let policy = OverloadGuard {
            t: PolicyThresholds::default(),
            cooldown: chrono::Duration::hours(1),
        };
        let mut state = LifeState::initial(day());
        state.planned_minutes = 500;
        assert!(policy.evaluate(&ctx_with(state.clone(), 9)).is_empty());

        state.planned_minutes = 540;
        let out = policy.evaluate(&ctx_with(state, 9));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload["overflowMinutes"], 60);
    }

    #[test]
    fn test_momentum_builder_picks_smallest_task() {
        let policy = MomentumBuilder {
            t: PolicyThresholds::default(),
            cooldown: chrono::Duration::hours(1),
        };
        let mut state = LifeState::initial(day());
        state.tasks.insert(TaskId::new("big"), open_task(120, None));
        state.tasks.insert(TaskId::new("small"), open_task(10, None));

        let out = policy.evaluate(&ctx_with(state, 9));
        assert_eq!(out[0].payload["taskId"], "small");
    }

    #[test]
    fn test_focus_protection_on_fragmented_day() {
        let policy = FocusProtection {
            t: PolicyThresholds::default(),
            cooldown: chrono::Duration::hours(1),
        };
        let mut state = LifeState::initial(day());
        state.free_minutes = 200;
        state.focus_capacity = 45;
        assert_eq!(policy.evaluate(&ctx_with(state, 9)).len(), 1);
    }

    #[test]
    fn test_drift_watch_one_per_category() {
        let policy = FinancialDriftWatch {
            t: PolicyThresholds::default(),
            cooldown: chrono::Duration::hours(1),
        };
        let mut state = LifeState::initial(day());
        state.spend_vs_intent.insert("food".into(), 1.3);
        state.spend_vs_intent.insert("fun".into(), 2.0);
        state.spend_vs_intent.insert("rent".into(), 1.0);

        let out = policy.evaluate(&ctx_with(state, 9));
        let keys: Vec<_> = out.iter().filter_map(|a| a.cooldown_key.clone()).collect();
        assert_eq!(keys, vec!["spend:food".to_string(), "spend:fun".to_string()]);
    }

    #[test]
    fn test_end_of_day_review_after_threshold() {
        let policy = EndOfDayReview {
            t: PolicyThresholds::default(),
            cooldown: chrono::Duration::hours(20),
        };
        assert!(policy.evaluate(&ctx_with(LifeState::initial(day()), 10)).is_empty());
        assert_eq!(policy.evaluate(&ctx_with(LifeState::initial(day()), 19)).len(), 1);
    }

    #[test]
    fn test_backlog_valve_lists_unscheduled() {
        let policy = BacklogPressureValve {
            t: PolicyThresholds::default(),
            cooldown: chrono::Duration::hours(1),
        };
        let mut state = LifeState::initial(day());
        for i in 0..12 {
            let scheduled = if i % 2 == 0 { Some(day()) } else { None };
            state.tasks.insert(TaskId::new(format!("t{:02}", i)), open_task(15, scheduled));
        }
        state.backlog_pressure = 12.0;

        let out = policy.evaluate(&ctx_with(state, 9));
        assert_eq!(out[0].payload["candidates"], json!(["t01", "t03", "t05"]));
    }
}
