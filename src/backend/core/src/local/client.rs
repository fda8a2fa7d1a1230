//! Local-first client.
//!
//! Two tiers of state are kept:
//! - **authoritative**: the last remote log fetched, folded alone;
//! - **speculative**: authoritative events plus the optimistic events of
//!   every command still in the outbox.
//!
//! Promotion rule: an optimistic event leaves the speculative tier when the
//! remote acknowledges its key (it then arrives with the next fetch), when the
//! remote rejects the command (rollback), or when the remote already holds a
//! different event under the same key (conflict; the remote wins).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::{info, instrument, warn};

use super::outbox::{Outbox, OutboxEntry};
use super::remote::RemoteLog;
use super::retry::RetryPolicy;
use super::store::{load_json, save_json, LocalStore};
use crate::commands::{resolve_tz_offset, Command, CommandExecutor, CommandOutcome};
use crate::config::{KernelConfig, PolicyThresholds};
use crate::error::{ErrorCode, KernelError, Result};
use crate::events::{
    AppendOutcome, Event, EventLog, EventQuery, EventStorage, InMemoryEventStorage, NewEvent,
    StoredEvent, UserId,
};
use crate::kernel::{TodayView, ViewInputs};
use crate::policy::{register_builtins, CooldownTable, PolicyRegistry};

/// A command the remote refused after it was applied locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub idempotency_key: String,
    pub code: ErrorCode,
    pub message: String,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Keys the remote committed, from this device or an identical retry.
    pub acknowledged: Vec<String>,
    /// Keys the remote already held with different events; local copy discarded.
    pub conflicts: Vec<String>,
    /// Commands rolled back locally after remote validation failed.
    pub rejected: Vec<Rejection>,
    /// Commands past their retry budget. Neither failed nor applied.
    pub still_pending: Vec<String>,
    /// Last transient error, if draining stopped early.
    pub transient_error: Option<String>,
    /// Outbox depth after the pass.
    pub remaining: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.transient_error.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub kernel: KernelConfig,
    pub policies: PolicyThresholds,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            kernel: config.kernel.clone(),
            policies: config.policies.clone(),
            retry: config.outbox.retry.clone(),
        }
    }
}

struct Tiers {
    outbox: Outbox,
    authoritative: Vec<StoredEvent>,
}

pub struct LocalFirstClient {
    user: UserId,
    remote: Arc<dyn RemoteLog>,
    store: Arc<dyn LocalStore>,
    mirror: Arc<InMemoryEventStorage>,
    executor: CommandExecutor,
    registry: PolicyRegistry,
    cooldowns: CooldownTable,
    config: ClientConfig,
    /// Held for short local sections only, never across a remote call.
    tiers: Mutex<Tiers>,
    /// One reconciliation pass at a time; only a pass removes outbox entries.
    pass: Mutex<()>,
    wake: Notify,
}

impl LocalFirstClient {
    /// Open the client, restoring the outbox and cached log from `store`.
    pub async fn open(
        user: UserId,
        remote: Arc<dyn RemoteLog>,
        store: Arc<dyn LocalStore>,
        config: ClientConfig,
    ) -> Result<Self> {
        let mirror = Arc::new(InMemoryEventStorage::new());
        let executor = CommandExecutor::new(EventLog::new(mirror.clone()), &config.kernel);
        let registry = PolicyRegistry::new();
        register_builtins(&registry, &config.policies);

        let outbox = Outbox::load(store.as_ref(), &user).await?;
        let authoritative: Vec<StoredEvent> = load_json(store.as_ref(), &Self::cache_key(&user))
            .await?
            .unwrap_or_default();

        let client = Self {
            user,
            remote,
            store,
            mirror,
            executor,
            registry,
            cooldowns: CooldownTable::new(),
            config,
            tiers: Mutex::new(Tiers {
                outbox,
                authoritative,
            }),
            pass: Mutex::new(()),
            wake: Notify::new(),
        };

        {
            let mut tiers = client.tiers.lock().await;
            client.rebuild(&mut tiers, &mut ReconcileReport::default()).await?;
        }
        Ok(client)
    }

    fn cache_key(user: &UserId) -> String {
        format!("log/{}", user)
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Resolves when new work was enqueued.
    pub async fn wait_for_work(&self) {
        self.wake.notified().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply `command` optimistically and queue it for the remote.
    pub async fn submit(&self, command: &Command) -> Result<CommandOutcome> {
        self.submit_at(command, Utc::now()).await
    }

    #[instrument(skip(self, command), fields(user_id = %self.user, key = %command.idempotency_key))]
    pub async fn submit_at(&self, command: &Command, now: DateTime<Utc>) -> Result<CommandOutcome> {
        let mut tiers = self.tiers.lock().await;

        let outcome = self.executor.execute(&self.user, command, now).await?;
        if outcome.deduped {
            return Ok(outcome);
        }

        let mut local_events = Vec::with_capacity(outcome.events.len());
        for event_ref in &outcome.events {
            if let Some(event) = self
                .mirror
                .find_by_key(&self.user, &event_ref.idempotency_key)
                .await?
            {
                local_events.push(event);
            }
        }

        tiers.outbox.push(OutboxEntry::new(command.clone(), now, local_events));
        tiers.outbox.save(self.store.as_ref(), &self.user).await?;
        drop(tiers);

        self.wake.notify_one();
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Speculative view: remote truth plus pending local commands.
    pub async fn today(&self, tz_offset_minutes: Option<i32>) -> Result<TodayView> {
        self.today_at(tz_offset_minutes, Utc::now()).await
    }

    pub async fn today_at(&self, tz_offset_minutes: Option<i32>, now: DateTime<Utc>) -> Result<TodayView> {
        // A rebuild swaps the mirror under this lock; never read it half done.
        let stored = {
            let _tiers = self.tiers.lock().await;
            self.mirror.query(&self.user, &EventQuery::all()).await?
        };
        self.view(&stored, tz_offset_minutes, now)
    }

    /// Authoritative view: the last fetched remote log only.
    pub async fn authoritative_today_at(
        &self,
        tz_offset_minutes: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<TodayView> {
        let stored = self.tiers.lock().await.authoritative.clone();
        self.view(&stored, tz_offset_minutes, now)
    }

    fn view(&self, stored: &[StoredEvent], tz_offset_minutes: Option<i32>, now: DateTime<Utc>) -> Result<TodayView> {
        let mut ordered: Vec<&StoredEvent> = stored.iter().collect();
        ordered.sort_by_key(|e| e.order_key());
        let events = ordered
            .into_iter()
            .map(Event::decode)
            .collect::<Result<Vec<_>>>()?;

        let tz = resolve_tz_offset(tz_offset_minutes, self.config.kernel.default_tz_offset_minutes)?;
        let inputs = ViewInputs {
            registry: &self.registry,
            cooldowns: &self.cooldowns,
            recent_window_days: self.config.kernel.recent_window_days,
        };
        Ok(inputs.derive(&events, now, tz))
    }

    pub async fn pending(&self) -> Vec<OutboxEntry> {
        self.tiers.lock().await.outbox.entries().to_vec()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    /// Drain the outbox in order, then refetch the remote log and rebuild.
    ///
    /// The tiers stay unlocked while the remote is called, so `submit` keeps
    /// working against an unreachable remote.
    #[instrument(skip(self), fields(user_id = %self.user))]
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let _pass = self.pass.lock().await;
        let mut report = ReconcileReport::default();
        // Local copies of committed commands, until the remote log is refetched.
        let mut committed: Vec<StoredEvent> = Vec::new();
        // Keys the remote reported as already applied, with our local copies.
        let mut deduped: Vec<(String, Vec<StoredEvent>)> = Vec::new();

        loop {
            let Some(entry) = self.tiers.lock().await.outbox.front().cloned() else {
                break;
            };
            let key = entry.key().to_string();
            let result = self.remote.submit(&self.user, &entry.command).await;

            // Only this pass removes entries, so the head is still `entry`.
            let mut tiers = self.tiers.lock().await;
            match result {
                Ok(outcome) => {
                    if outcome.deduped {
                        deduped.push((key, entry.local_events));
                    } else {
                        committed.extend(entry.local_events);
                        report.acknowledged.push(key);
                    }
                    tiers.outbox.pop_front();
                }
                Err(e) if e.is_validation() => {
                    warn!(key = %key, code = %e.code(), "Remote rejected command, rolling back");
                    report.rejected.push(Rejection {
                        idempotency_key: key,
                        code: e.code(),
                        message: e.user_message().to_string(),
                    });
                    tiers.outbox.pop_front();
                }
                Err(e) => {
                    if let Some(head) = tiers.outbox.front_mut() {
                        head.attempts += 1;
                        head.last_error = Some(e.to_string());
                        warn!(key = %key, attempts = head.attempts, error = %e, "Remote unavailable");
                    }
                    report.transient_error = Some(e.to_string());
                    tiers.outbox.save(self.store.as_ref(), &self.user).await?;
                    break;
                }
            }
            tiers.outbox.save(self.store.as_ref(), &self.user).await?;
        }

        let fetched = self.remote.fetch(&self.user, None).await;

        let mut tiers = self.tiers.lock().await;
        match fetched {
            Ok(events) => {
                save_json(self.store.as_ref(), &Self::cache_key(&self.user), &events).await?;
                tiers.authoritative = events;
                for (key, local) in deduped {
                    if Self::matches_remote(&tiers.authoritative, &local) {
                        report.acknowledged.push(key);
                    } else {
                        self.record_conflict(&key, &mut report);
                    }
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Remote log fetch failed, keeping cached log");
                report.transient_error.get_or_insert_with(|| e.to_string());
                // The remote holds these keys; keep local copies visible until
                // the next fetch replaces the log. Divergence surfaces then.
                for (key, local) in deduped {
                    committed.extend(local);
                    report.acknowledged.push(key);
                }
                let known: HashSet<String> = tiers
                    .authoritative
                    .iter()
                    .map(|e| e.idempotency_key.clone())
                    .collect();
                tiers
                    .authoritative
                    .extend(committed.into_iter().filter(|e| !known.contains(&e.idempotency_key)));
            }
            Err(e) => return Err(e),
        }

        self.rebuild(&mut tiers, &mut report).await?;

        report.still_pending = tiers
            .outbox
            .entries()
            .iter()
            .filter(|e| self.config.retry.exhausted(e.attempts))
            .map(|e| e.key().to_string())
            .collect();
        report.remaining = tiers.outbox.len();
        report.acknowledged.sort();
        report.conflicts.sort();

        info!(
            acknowledged = report.acknowledged.len(),
            conflicts = report.conflicts.len(),
            rejected = report.rejected.len(),
            remaining = report.remaining,
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    /// Whether the remote holds events equal to `local` under the same keys.
    fn matches_remote(authoritative: &[StoredEvent], local: &[StoredEvent]) -> bool {
        local.iter().all(|mine| {
            authoritative.iter().any(|theirs| {
                theirs.idempotency_key == mine.idempotency_key
                    && theirs.event_type == mine.event_type
                    && theirs.metadata == mine.metadata
            })
        })
    }

    fn record_conflict(&self, key: &str, report: &mut ReconcileReport) {
        KernelError::new(
            ErrorCode::ReconciliationConflict,
            format!("remote already committed {} with different events", key),
        )
        .log();
        report.conflicts.push(key.to_string());
    }

    /// Reset the mirror to the authoritative log and replay pending entries.
    async fn rebuild(&self, tiers: &mut Tiers, report: &mut ReconcileReport) -> Result<()> {
        self.mirror.replace_user(&self.user, tiers.authoritative.clone());

        let before = tiers.outbox.len();
        let mut kept = Outbox::default();
        while let Some(entry) = tiers.outbox.pop_front() {
            if entry.local_events.is_empty() {
                kept.push(entry);
                continue;
            }
            let batch: Vec<NewEvent> = entry.local_events.iter().cloned().map(NewEvent::from).collect();
            match self.mirror.append_batch(&self.user, batch).await? {
                AppendOutcome::Appended(_) => kept.push(entry),
                AppendOutcome::Duplicate(_) => {
                    if Self::matches_remote(&tiers.authoritative, &entry.local_events) {
                        report.acknowledged.push(entry.key().to_string());
                    } else {
                        self.record_conflict(entry.key(), report);
                    }
                }
            }
        }

        let changed = kept.len() != before;
        tiers.outbox = kept;
        if changed {
            tiers.outbox.save(self.store.as_ref(), &self.user).await?;
        }
        Ok(())
    }
}
