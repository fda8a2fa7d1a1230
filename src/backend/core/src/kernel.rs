//! The kernel: event log, executor, policy registry and cooldown table
//! owned together by one instance.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::commands::{resolve_tz_offset, Command, CommandExecutor, CommandOutcome};
use crate::config::{KernelConfig, PolicyThresholds};
use crate::error::Result;
use crate::events::{local_day, Event, EventLog, EventQuery, StoredEvent, UserId};
use crate::policy::{register_builtins, run_policies, CooldownTable, PolicyContext, PolicyRegistry, ProposedAction};
use crate::reducer::{replay, LifeState};

/// State and suggestions for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayView {
    pub state: LifeState,
    pub suggestions: Vec<ProposedAction>,
    /// Suggestions that went `pending -> expired` since the last view because
    /// their cooldown ran out unanswered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expired: Vec<String>,
}

/// Inputs shared by every derivation of a [`TodayView`].
pub struct ViewInputs<'a> {
    pub registry: &'a PolicyRegistry,
    pub cooldowns: &'a CooldownTable,
    pub recent_window_days: u32,
}

impl ViewInputs<'_> {
    /// Replay `events` for the local day at `now` and evaluate policies.
    pub fn derive(&self, events: &[Event], now: DateTime<Utc>, tz_offset_minutes: i32) -> TodayView {
        let day = local_day(now, tz_offset_minutes);
        let state = replay(day, events);
        let recent = recent_window(events, day, self.recent_window_days);
        let ctx = PolicyContext::build(state, recent, now, tz_offset_minutes);
        let lapsed = self.cooldowns.sweep(now);
        let suggestions = run_policies(self.registry, &ctx, self.cooldowns, now);
        let expired: Vec<String> = lapsed
            .into_iter()
            .filter(|id| ctx.state.verdict(id).is_none())
            .filter(|id| !suggestions.iter().any(|s| &s.id == id))
            .collect();
        if !expired.is_empty() {
            debug!(count = expired.len(), "Suggestions expired");
        }
        TodayView {
            state: ctx.state,
            suggestions,
            expired,
        }
    }
}

fn recent_window(events: &[Event], day: NaiveDate, days: u32) -> Vec<Event> {
    let start = day - Duration::days(days as i64);
    events
        .iter()
        .filter(|e| e.day > start && e.day <= day)
        .cloned()
        .collect()
}

#[derive(Clone)]
pub struct Kernel {
    executor: CommandExecutor,
    registry: PolicyRegistry,
    /// One table per user: cooldown keys are only unique within a log.
    cooldowns: Arc<DashMap<UserId, Arc<CooldownTable>>>,
    config: KernelConfig,
}

impl Kernel {
    /// Kernel with the built-in policies registered.
    pub fn new(log: EventLog, config: KernelConfig, thresholds: &PolicyThresholds) -> Self {
        let registry = PolicyRegistry::new();
        register_builtins(&registry, thresholds);
        Self::with_registry(log, config, registry)
    }

    pub fn with_registry(log: EventLog, config: KernelConfig, registry: PolicyRegistry) -> Self {
        Self {
            executor: CommandExecutor::new(log, &config),
            registry,
            cooldowns: Arc::new(DashMap::new()),
            config,
        }
    }

    /// In-memory kernel with default configuration.
    pub fn in_memory() -> Self {
        Self::new(
            EventLog::in_memory(),
            KernelConfig::default(),
            &PolicyThresholds::default(),
        )
    }

    pub fn log(&self) -> &EventLog {
        self.executor.log()
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Cooldown table of `user`, created on first use.
    pub fn cooldowns(&self, user: &UserId) -> Arc<CooldownTable> {
        self.cooldowns.entry(user.clone()).or_default().clone()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub async fn submit(&self, user: &UserId, command: &Command) -> Result<CommandOutcome> {
        self.submit_at(user, command, Utc::now()).await
    }

    pub async fn submit_at(&self, user: &UserId, command: &Command, now: DateTime<Utc>) -> Result<CommandOutcome> {
        self.executor.execute(user, command, now).await
    }

    pub async fn today(&self, user: &UserId, tz_offset_minutes: Option<i32>) -> Result<TodayView> {
        self.today_at(user, tz_offset_minutes, Utc::now()).await
    }

    /// Replay the log for the caller's local day and evaluate policies.
    #[instrument(skip(self), fields(user_id = %user))]
    pub async fn today_at(
        &self,
        user: &UserId,
        tz_offset_minutes: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<TodayView> {
        let tz = resolve_tz_offset(tz_offset_minutes, self.config.default_tz_offset_minutes)?;
        let events = self.log().load(user).await?;
        let cooldowns = self.cooldowns(user);
        Ok(self.view_inputs(&cooldowns).derive(&events, now, tz))
    }

    pub async fn events(&self, user: &UserId, query: &EventQuery) -> Result<Vec<StoredEvent>> {
        self.log().query(user, query).await
    }

    pub fn view_inputs<'a>(&'a self, cooldowns: &'a CooldownTable) -> ViewInputs<'a> {
        ViewInputs {
            registry: &self.registry,
            cooldowns,
            recent_window_days: self.config.recent_window_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[tokio::test]
    async fn test_today_reflects_submitted_commands() {
        let kernel = Kernel::in_memory();
        let user = UserId::new("u1");
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 10, 0, 0).unwrap();

        kernel
            .submit_at(
                &user,
                &Command::new(
                    "create_task",
                    json!({ "taskId": "t1", "title": "Plan week", "estimateMinutes": 30, "scheduledFor": "2026-03-03" }),
                    "k1",
                ),
                now,
            )
            .await
            .unwrap();

        let view = kernel.today_at(&user, Some(0), now).await.unwrap();
        assert_eq!(view.state.planned_minutes, 30);
        assert_eq!(view.state.backlog_pressure, 1.0);
        // Nothing completed lately and one open task: a quick win is offered.
        assert!(view.suggestions.iter().any(|s| s.action_type == "quick_win"));
    }

    #[tokio::test]
    async fn test_kernels_are_independent() {
        let a = Kernel::in_memory();
        let b = Kernel::with_registry(EventLog::in_memory(), KernelConfig::default(), PolicyRegistry::new());
        assert_eq!(a.registry().len(), 7);
        assert!(b.registry().is_empty());
    }
}
