//! Policy engine tests: ordering independence, cooldowns and built-in
//! scenarios driven through the kernel.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use lifeos_core::commands::Command;
use lifeos_core::config::PolicyThresholds;
use lifeos_core::events::UserId;
use lifeos_core::policy::{
    register_builtins, run_policies, CooldownTable, FnPolicy, Policy, PolicyContext,
    PolicyRegistry, ProposedAction, BASELINE_PRIORITY,
};
use lifeos_core::reducer::LifeState;
use lifeos_core::Kernel;
use serde_json::json;

// ============================================================================
// Test Utilities
// ============================================================================

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

fn context() -> PolicyContext {
    let mut state = LifeState::initial(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
    state.backlog_pressure = 12.0;
    PolicyContext::build(state, Vec::new(), at(10, 19), 0)
}

fn keyed(name: &'static str, priority: u32, key: &'static str) -> Arc<dyn Policy> {
    Arc::new(FnPolicy::new(name, move |ctx: &PolicyContext| {
        vec![ProposedAction::new(name, format!("{}_action", name), priority, ctx.day())
            .with_cooldown_key(key)]
    }))
}

fn ids(actions: &[ProposedAction]) -> BTreeSet<String> {
    actions.iter().map(|a| a.id.clone()).collect()
}

fn run(order: &[Arc<dyn Policy>]) -> Vec<ProposedAction> {
    let registry = PolicyRegistry::new();
    for policy in order {
        registry.register(policy.clone());
    }
    register_builtins(&registry, &PolicyThresholds::default());
    run_policies(&registry, &context(), &CooldownTable::new(), at(10, 19))
}

// ============================================================================
// Commutativity
// ============================================================================

#[test]
fn test_policy_order_does_not_change_survivors() {
    let a = keyed("a", 60, "shared");
    let b = keyed("b", 75, "shared");
    let c = keyed("c", 75, "tie");
    let d = keyed("d", 75, "tie");

    let forward = run(&[a.clone(), b.clone(), c.clone(), d.clone()]);
    let backward = run(&[d, c, b, a]);

    assert_eq!(ids(&forward), ids(&backward));
    assert!(forward.iter().any(|s| s.policy == "b"));
    assert!(!forward.iter().any(|s| s.policy == "a"));
    assert_eq!(forward.iter().filter(|s| s.cooldown_key.as_deref() == Some("tie")).count(), 1);
}

#[test]
fn test_output_sorted_by_priority() {
    let out = run(&[keyed("low", 10, "low"), keyed("high", 90, "high")]);
    let priorities: Vec<u32> = out.iter().map(|s| s.priority).collect();
    let mut sorted = priorities.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(priorities, sorted);
    assert_eq!(out[0].policy, "high");
}

// ============================================================================
// Cooldown
// ============================================================================

#[test]
fn test_cooldown_suppresses_competitor_until_expiry() {
    let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
    let cooldowns = CooldownTable::new();

    let first = PolicyRegistry::new();
    first.register(keyed("first", 50, "slot"));
    let ctx = PolicyContext::build(LifeState::initial(day), Vec::new(), at(10, 9), 0);
    assert_eq!(run_policies(&first, &ctx, &cooldowns, at(10, 9)).len(), 1);

    let second = PolicyRegistry::new();
    second.register(Arc::new(
        FnPolicy::new("second", |ctx: &PolicyContext| {
            vec![ProposedAction::new("second", "other", 99, ctx.day()).with_cooldown_key("slot")]
        })
        .with_cooldown(Duration::hours(1)),
    ));

    assert!(run_policies(&second, &ctx, &cooldowns, at(10, 10)).is_empty());
    assert_eq!(run_policies(&second, &ctx, &cooldowns, at(10, 14)).len(), 1);

    let expired = cooldowns.sweep(at(10, 16));
    assert_eq!(expired.len(), 1);
    assert!(cooldowns.is_empty());
}

// ============================================================================
// Built-in Scenarios
// ============================================================================

#[tokio::test]
async fn test_low_habit_completion_downshifts_once() {
    let kernel = Kernel::in_memory();
    let user = UserId::new("ana");

    let checks = [(5, true), (6, false), (7, false), (8, false), (9, false)];
    for (i, (day, done)) in checks.iter().enumerate() {
        kernel
            .submit_at(
                &user,
                &Command::new("log_habit", json!({ "habitId": "run", "done": done }), format!("h{}", i)),
                at(*day, 8),
            )
            .await
            .unwrap();
    }

    let events = kernel.log().load(&user).await.unwrap();
    let view = kernel.today_at(&user, None, at(10, 9)).await.unwrap();
    let ctx = PolicyContext::build(view.state.clone(), events, at(10, 9), 0);
    assert_eq!(ctx.facts.habit_done_7_days, 1);
    assert_eq!(ctx.facts.habit_missed_7_days, 4);
    assert_eq!(ctx.facts.habit_completion_7_days, Some(0.2));

    let downshifts: Vec<_> = view
        .suggestions
        .iter()
        .filter(|s| s.policy == "habit_downshift")
        .collect();
    assert_eq!(downshifts.len(), 1);
    assert!(downshifts[0].action_type.contains("downshift"));
    assert!(downshifts[0].priority > BASELINE_PRIORITY);
}

#[tokio::test]
async fn test_drift_watch_flags_overspent_category() {
    let kernel = Kernel::in_memory();
    let user = UserId::new("ana");

    kernel
        .submit_at(
            &user,
            &Command::new(
                "set_plan",
                json!({ "workdayStartMinute": 540, "workdayEndMinute": 1020, "spendIntents": { "food": 10000, "fun": 5000 } }),
                "plan",
            ),
            at(2, 8),
        )
        .await
        .unwrap();
    kernel
        .submit_at(
            &user,
            &Command::new("add_expense", json!({ "category": "food", "amountCents": 12500 }), "e1"),
            at(9, 8),
        )
        .await
        .unwrap();

    let view = kernel.today_at(&user, None, at(10, 9)).await.unwrap();
    let drift: Vec<_> = view
        .suggestions
        .iter()
        .filter(|s| s.policy == "financial_drift_watch")
        .collect();
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].cooldown_key.as_deref(), Some("spend:food"));
}

#[tokio::test]
async fn test_review_only_in_the_evening() {
    let kernel = Kernel::in_memory();
    let user = UserId::new("ana");

    let morning = kernel.today_at(&user, None, at(10, 9)).await.unwrap();
    assert!(morning.suggestions.iter().all(|s| s.policy != "end_of_day_review"));

    let evening = kernel.today_at(&user, None, at(10, 19)).await.unwrap();
    assert!(evening.suggestions.iter().any(|s| s.policy == "end_of_day_review"));
}
