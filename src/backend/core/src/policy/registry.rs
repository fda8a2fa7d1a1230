//! Policy registration and evaluation.
//!
//! A [`PolicyRegistry`] is an explicit value owned by a kernel instance;
//! there is no process-wide policy set.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use super::context::PolicyContext;
use super::cooldown::CooldownTable;
use super::suggestion::ProposedAction;
use crate::telemetry::metrics;

/// Window applied when a policy does not choose its own.
pub const DEFAULT_COOLDOWN_HOURS: i64 = 4;

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A pure rule from context to proposals.
///
/// Implementations must not perform I/O or keep mutable state.
pub trait Policy: Send + Sync {
    /// Unique registration name.
    fn name(&self) -> &str;

    fn evaluate(&self, ctx: &PolicyContext) -> Vec<ProposedAction>;

    /// How long a cooldown key stays claimed once this policy surfaces it.
    fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(DEFAULT_COOLDOWN_HOURS)
    }
}

type EvalFn = dyn Fn(&PolicyContext) -> Vec<ProposedAction> + Send + Sync;

/// Policy built from a closure.
pub struct FnPolicy {
    name: String,
    cooldown: chrono::Duration,
    eval: Box<EvalFn>,
}

impl FnPolicy {
    pub fn new<F>(name: impl Into<String>, eval: F) -> Self
    where
        F: Fn(&PolicyContext) -> Vec<ProposedAction> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            cooldown: chrono::Duration::hours(DEFAULT_COOLDOWN_HOURS),
            eval: Box::new(eval),
        }
    }

    pub fn with_cooldown(mut self, cooldown: chrono::Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

impl Policy for FnPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Vec<ProposedAction> {
        (self.eval)(ctx)
    }

    fn cooldown(&self) -> chrono::Duration {
        self.cooldown
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered set of named policies.
///
/// Thread-safe via interior `RwLock`; clones share the same set.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    inner: Arc<RwLock<Vec<Arc<dyn Policy>>>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy. A name that is already present is left as is and
    /// `false` is returned.
    pub fn register(&self, policy: Arc<dyn Policy>) -> bool {
        let mut policies = self.inner.write();
        if policies.iter().any(|p| p.name() == policy.name()) {
            debug!(policy = policy.name(), "Policy already registered");
            return false;
        }
        info!(policy = policy.name(), "Policy registered");
        policies.push(policy);
        true
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn Policy>> {
        self.inner.read().clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Evaluation
// ═══════════════════════════════════════════════════════════════════════════════

struct Candidate {
    rank: usize,
    window: chrono::Duration,
    action: ProposedAction,
}

/// Evaluate every registered policy and merge the results.
///
/// 1. Suggestions the user already answered are dropped.
/// 2. Candidates sharing a cooldown key within one run are resolved to the
///    highest priority, ties to the smallest id.
/// 3. Survivors are admitted through the cooldown table in one critical
///    section; a key held by a different, unexpired suggestion suppresses.
/// 4. Output is sorted by priority descending, ties by registration order.
pub fn run_policies(
    registry: &PolicyRegistry,
    ctx: &PolicyContext,
    cooldowns: &CooldownTable,
    now: DateTime<Utc>,
) -> Vec<ProposedAction> {
    let mut candidates = Vec::new();
    for (rank, policy) in registry.snapshot().iter().enumerate() {
        for action in policy.evaluate(ctx) {
            if ctx.state.verdict(&action.id).is_some() {
                continue;
            }
            candidates.push(Candidate {
                rank,
                window: policy.cooldown(),
                action,
            });
        }
    }

    let mut keyed: BTreeMap<String, Candidate> = BTreeMap::new();
    let mut unkeyed = Vec::new();
    for candidate in candidates {
        let Some(key) = candidate.action.cooldown_key.clone() else {
            unkeyed.push(candidate);
            continue;
        };
        let wins = keyed
            .get(&key)
            .map_or(true, |current| outranks(&candidate.action, &current.action));
        if wins {
            keyed.insert(key, candidate);
        } else {
            debug!(key = %key, suppressed = %candidate.action.id, "Cooldown key collision");
        }
    }

    let mut survivors = cooldowns.with_guard(now, |guard| {
        keyed
            .into_iter()
            .filter(|(key, c)| {
                let admitted = guard.admit(key, &c.action.id, c.window);
                if !admitted {
                    debug!(key = %key, suppressed = %c.action.id, "Suppressed by active cooldown");
                }
                admitted
            })
            .map(|(_, c)| c)
            .collect::<Vec<_>>()
    });
    survivors.extend(unkeyed);

    survivors.sort_by(|a, b| {
        b.action
            .priority
            .cmp(&a.action.priority)
            .then(a.rank.cmp(&b.rank))
            .then_with(|| a.action.id.cmp(&b.action.id))
    });

    survivors
        .into_iter()
        .map(|c| {
            metrics::record_suggestion(&c.action.policy);
            c.action
        })
        .collect()
}

/// Collision order: priority, then the smaller id.
fn outranks(a: &ProposedAction, b: &ProposedAction) -> bool {
    a.priority > b.priority || (a.priority == b.priority && a.id < b.id)
}
