//! Command execution.
//!
//! Per command: `received -> idempotency-checked -> duplicate (short-circuit)
//! | fresh -> validate -> append`. The executor only translates commands into
//! events; rebuilding state and suggestions afterwards is the caller's job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::command::{
    event_key, Command, CommandIntent, CommandOutcome, DERIVED_KEY_SEPARATOR, MAX_TZ_OFFSET_MINUTES,
};
use crate::config::KernelConfig;
use crate::error::{ErrorCode, ErrorDetails, KernelError, Result};
use crate::events::{local_day, AppendOutcome, EventLog, NewEvent, UserId};
use crate::reducer::replay;
use crate::telemetry::metrics;

/// Commands for one user run one at a time: validation reads the state the
/// append will extend. Clones share the per-user locks.
#[derive(Clone)]
pub struct CommandExecutor {
    log: EventLog,
    default_tz_offset_minutes: i32,
    user_locks: Arc<DashMap<UserId, Arc<Mutex<()>>>>,
}

impl CommandExecutor {
    pub fn new(log: EventLog, config: &KernelConfig) -> Self {
        Self {
            log,
            default_tz_offset_minutes: config.default_tz_offset_minutes,
            user_locks: Arc::new(DashMap::new()),
        }
    }

    fn user_lock(&self, user: &UserId) -> Arc<Mutex<()>> {
        self.user_locks.entry(user.clone()).or_default().clone()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Resolve and range-check the command's UTC offset.
    pub fn tz_offset(&self, command: &Command) -> Result<i32> {
        resolve_tz_offset(command.tz_offset_minutes, self.default_tz_offset_minutes)
    }

    /// Execute `command` for `user` as of `now`.
    #[instrument(skip(self, command), fields(user_id = %user, cmd = %command.cmd, key = %command.idempotency_key))]
    pub async fn execute(&self, user: &UserId, command: &Command, now: DateTime<Utc>) -> Result<CommandOutcome> {
        let result = self.execute_inner(user, command, now).await;
        let outcome = match &result {
            Ok(o) if o.deduped => "deduped",
            Ok(_) => "applied",
            Err(e) if e.is_validation() => "rejected",
            Err(_) => "failed",
        };
        metrics::record_command(&command.cmd, outcome);
        if let Err(ref e) = result {
            e.log();
        }
        result
    }

    async fn execute_inner(&self, user: &UserId, command: &Command, now: DateTime<Utc>) -> Result<CommandOutcome> {
        let key = command.idempotency_key.trim();
        if key.is_empty() {
            return Err(KernelError::new(
                ErrorCode::MissingIdempotencyKey,
                "idempotencyKey is required",
            ));
        }
        if key.contains(DERIVED_KEY_SEPARATOR) {
            return Err(KernelError::validation(format!(
                "idempotencyKey must not contain '{}'",
                DERIVED_KEY_SEPARATOR
            ))
            .with_details(ErrorDetails::new().with_field("idempotencyKey")));
        }

        let lock = self.user_lock(user);
        let _serialized = lock.lock().await;

        if let Some(existing) = self.log.find_by_key(user, key).await? {
            info!(seq = existing.seq, "Command already applied");
            return Ok(CommandOutcome::deduped(vec![existing.to_ref()]));
        }

        let intent = CommandIntent::parse(command)?;
        let tz_offset = self.tz_offset(command)?;
        let day = local_day(now, tz_offset);

        let history = self.log.load(user).await?;
        let state = replay(day, &history);
        let kinds = intent.plan(&state, key)?;

        let events = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| NewEvent::new(user.clone(), now, day, event_key(key, i), kind))
            .collect::<Result<Vec<_>>>()?;

        match self.log.append_batch(user, events).await? {
            AppendOutcome::Appended(refs) => {
                info!(events = refs.len(), "Command applied");
                Ok(CommandOutcome::applied(refs))
            }
            AppendOutcome::Duplicate(refs) => {
                // Another process committed the same key first.
                warn!("Command committed concurrently");
                Ok(CommandOutcome::deduped(refs))
            }
        }
    }
}

/// Pick `offset` or the default, rejecting offsets beyond +/-14h.
pub fn resolve_tz_offset(offset: Option<i32>, default: i32) -> Result<i32> {
    let offset = offset.unwrap_or(default);
    if offset.abs() > MAX_TZ_OFFSET_MINUTES {
        return Err(KernelError::invalid_field(
            "tzOffsetMinutes",
            "tzOffsetMinutes must be within +/-840",
        ));
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventQuery;
    use chrono::TimeZone;
    use serde_json::json;

    fn executor() -> CommandExecutor {
        CommandExecutor::new(EventLog::in_memory(), &KernelConfig::default())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 15, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_complete_task_emits_two_events() {
        let exec = executor();
        let user = UserId::new("u1");

        exec.execute(
            &user,
            &Command::new("create_task", json!({ "taskId": "t1", "title": "Inbox zero", "estimateMinutes": 20 }), "c1"),
            now(),
        )
        .await
        .unwrap();
        let outcome = exec
            .execute(&user, &Command::new("complete_task", json!({ "taskId": "t1" }), "c2"), now())
            .await
            .unwrap();

        assert!(outcome.success);
        let keys: Vec<String> = outcome.events.iter().map(|r| r.idempotency_key.clone()).collect();
        assert_eq!(keys, vec!["c2".to_string(), "c2#1".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_key_short_circuits() {
        let exec = executor();
        let user = UserId::new("u1");
        let cmd = Command::new("log_habit", json!({ "habitId": "floss", "done": true }), "h1");

        let first = exec.execute(&user, &cmd, now()).await.unwrap();
        let second = exec.execute(&user, &cmd, now()).await.unwrap();

        assert!(!first.deduped);
        assert!(second.success && second.deduped);
        let all = exec.log().query(&user, &EventQuery::all()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_appends_nothing() {
        let exec = executor();
        let user = UserId::new("u1");

        let err = exec
            .execute(&user, &Command::new("complete_task", json!({ "taskId": "missing" }), "x"), now())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::TaskNotFound);
        assert!(exec.log().query(&user, &EventQuery::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let exec = executor();
        let err = exec
            .execute(&UserId::new("u1"), &Command::new("log_habit", json!({}), " "), now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingIdempotencyKey);
    }

    #[tokio::test]
    async fn test_day_follows_tz_offset() {
        let exec = executor();
        let user = UserId::new("u1");
        let late = Utc.with_ymd_and_hms(2026, 10, 1, 23, 30, 0).unwrap();

        let cmd = Command::new("log_habit", json!({ "habitId": "read", "done": true }), "tz").with_tz_offset(120);
        exec.execute(&user, &cmd, late).await.unwrap();

        let stored = exec.log().find_by_key(&user, "tz").await.unwrap().unwrap();
        assert_eq!(stored.day, chrono::NaiveDate::from_ymd_opt(2026, 10, 2).unwrap());

        let bad = Command::new("log_habit", json!({ "habitId": "read", "done": true }), "tz2").with_tz_offset(2000);
        assert!(exec.execute(&user, &bad, late).await.is_err());
    }

    #[tokio::test]
    async fn test_derived_looking_key_rejected() {
        let exec = executor();
        let user = UserId::new("u1");
        exec.execute(
            &user,
            &Command::new("create_task", json!({ "taskId": "t1", "title": "Taxes", "estimateMinutes": 60 }), "c1"),
            now(),
        )
        .await
        .unwrap();
        exec.execute(&user, &Command::new("complete_task", json!({ "taskId": "t1" }), "c2"), now())
            .await
            .unwrap();

        let err = exec
            .execute(
                &user,
                &Command::new("log_habit", json!({ "habitId": "walk", "done": true }), "c2#1"),
                now(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.details().field.as_deref(), Some("idempotencyKey"));
        let all = exec.log().query(&user, &EventQuery::all()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|e| e.event_type != "HABIT_DONE"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_commands_for_one_user_are_serialized() {
        let exec = executor();
        let user = UserId::new("u1");
        exec.execute(
            &user,
            &Command::new("create_task", json!({ "taskId": "t1", "title": "Gym", "estimateMinutes": 45 }), "c1"),
            now(),
        )
        .await
        .unwrap();

        let spawn_complete = |key: &'static str| {
            let exec = exec.clone();
            let user = user.clone();
            tokio::spawn(async move {
                let cmd = Command::new("complete_task", json!({ "taskId": "t1" }), key);
                exec.execute(&user, &cmd, now()).await
            })
        };
        let (a, b) = tokio::join!(spawn_complete("done-a"), spawn_complete("done-b"));

        let failures: Vec<_> = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter_map(|r| r.err())
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].code(), ErrorCode::InvalidStateTransition);

        let all = exec.log().query(&user, &EventQuery::all()).await.unwrap();
        let bumps = all.iter().filter(|e| e.event_type == "MOMENTUM_ADJUSTED").count();
        assert_eq!(bumps, 1);
    }
}
