//! Read-only evaluation context handed to every policy.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::events::{local_minute_of_day, Event, EventKind};
use crate::reducer::LifeState;

/// Facts precomputed once per run so policies stay trivial.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFacts {
    pub completed_today: u32,
    pub completed_last_3_days: u32,
    pub habit_done_7_days: u32,
    pub habit_missed_7_days: u32,
    /// `done / (done + missed)`, `None` without samples.
    pub habit_completion_7_days: Option<f64>,
    pub streak_breaks_7_days: u32,
    pub backlog_count: usize,
    pub local_minute_of_day: u32,
}

/// Ephemeral view built per evaluation. Never persisted.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub state: LifeState,
    /// Bounded window of recent events, in log order.
    pub recent: Vec<Event>,
    pub facts: PolicyFacts,
    pub now: DateTime<Utc>,
}

impl PolicyContext {
    pub fn build(state: LifeState, recent: Vec<Event>, now: DateTime<Utc>, tz_offset_minutes: i32) -> Self {
        let facts = compute_facts(&state, &recent, now, tz_offset_minutes);
        Self {
            state,
            recent,
            facts,
            now,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.state.day
    }
}

fn within(day: NaiveDate, today: NaiveDate, days: i64) -> bool {
    day <= today && day > today - Duration::days(days)
}

fn compute_facts(
    state: &LifeState,
    recent: &[Event],
    now: DateTime<Utc>,
    tz_offset_minutes: i32,
) -> PolicyFacts {
    let today = state.day;
    let mut facts = PolicyFacts {
        completed_today: 0,
        completed_last_3_days: 0,
        habit_done_7_days: 0,
        habit_missed_7_days: 0,
        habit_completion_7_days: None,
        streak_breaks_7_days: 0,
        backlog_count: state.backlog_count(),
        local_minute_of_day: local_minute_of_day(now, tz_offset_minutes),
    };

    for event in recent {
        match &event.kind {
            EventKind::TaskCompleted(_) => {
                if event.day == today {
                    facts.completed_today += 1;
                }
                if within(event.day, today, 3) {
                    facts.completed_last_3_days += 1;
                }
            }
            EventKind::HabitDone(_) if within(event.day, today, 7) => {
                facts.habit_done_7_days += 1;
            }
            EventKind::HabitMissed(_) if within(event.day, today, 7) => {
                facts.habit_missed_7_days += 1;
                facts.streak_breaks_7_days += 1;
            }
            _ => {}
        }
    }

    let samples = facts.habit_done_7_days + facts.habit_missed_7_days;
    if samples > 0 {
        facts.habit_completion_7_days = Some(facts.habit_done_7_days as f64 / samples as f64);
    }

    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventId, HabitCheck, TaskId, TaskRef};
    use chrono::TimeZone;

    fn event(day: NaiveDate, kind: EventKind) -> Event {
        Event {
            id: EventId::new(),
            seq: 0,
            timestamp: Utc.timestamp_opt(1_790_000_000, 0).unwrap(),
            day,
            idempotency_key: String::new(),
            kind,
        }
    }

    #[test]
    fn test_habit_ratio_over_seven_days() {
        let today = NaiveDate::from_ymd_opt(2026, 9, 10).unwrap();
        let habit = || HabitCheck { habit_id: "meditate".into() };
        let mut recent = vec![event(today, EventKind::HabitDone(habit()))];
        for back in 0..4 {
            recent.push(event(today - Duration::days(back), EventKind::HabitMissed(habit())));
        }
        // Outside the window.
        recent.push(event(today - Duration::days(7), EventKind::HabitMissed(habit())));

        let now = Utc.with_ymd_and_hms(2026, 9, 10, 12, 0, 0).unwrap();
        let ctx = PolicyContext::build(LifeState::initial(today), recent, now, 0);

        assert_eq!(ctx.facts.habit_done_7_days, 1);
        assert_eq!(ctx.facts.habit_missed_7_days, 4);
        assert_eq!(ctx.facts.habit_completion_7_days, Some(0.2));
        assert_eq!(ctx.facts.local_minute_of_day, 720);
    }

    #[test]
    fn test_completion_windows() {
        let today = NaiveDate::from_ymd_opt(2026, 9, 10).unwrap();
        let done = || EventKind::TaskCompleted(TaskRef { task_id: TaskId::new("t") });
        let recent = vec![
            event(today, done()),
            event(today - Duration::days(2), done()),
            event(today - Duration::days(3), done()),
        ];

        let ctx = PolicyContext::build(LifeState::initial(today), recent, Utc::now(), 0);
        assert_eq!(ctx.facts.completed_today, 1);
        assert_eq!(ctx.facts.completed_last_3_days, 2);
        assert_eq!(ctx.facts.habit_completion_7_days, None);
    }
}
