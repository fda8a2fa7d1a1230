//! Benchmarks for replay and policy evaluation.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lifeos_core::events::{
    CalBlockAdded, Event, EventId, EventKind, ExpenseAdded, HabitCheck, MomentumAdjusted,
    TaskCreated, TaskId, TaskRef,
};
use lifeos_core::policy::{register_builtins, run_policies, CooldownTable, PolicyContext, PolicyRegistry};
use lifeos_core::reducer::replay;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

/// A mixed log of `n` events spread over the 14 days before `day()`.
fn build_log(n: usize) -> Vec<Event> {
    let start = Utc.with_ymd_and_hms(2026, 2, 25, 8, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let timestamp = start + Duration::minutes((i as i64) * (14 * 24 * 60) / n.max(1) as i64);
            let task_id = TaskId::new(format!("t{}", i / 4));
            let kind = match i % 8 {
                0 => EventKind::TaskCreated(TaskCreated {
                    task_id,
                    title: format!("task {}", i),
                    estimate_minutes: 30,
                    scheduled_for: Some(day()),
                }),
                1 => EventKind::HabitDone(HabitCheck { habit_id: "run".into() }),
                2 => EventKind::HabitMissed(HabitCheck { habit_id: "read".into() }),
                3 => EventKind::ExpenseAdded(ExpenseAdded {
                    category: "food".into(),
                    amount_cents: 1_250,
                    note: None,
                }),
                4 => EventKind::TaskCompleted(TaskRef { task_id }),
                5 => EventKind::MomentumAdjusted(MomentumAdjusted { delta: 5 }),
                6 => EventKind::CalBlockAdded(CalBlockAdded {
                    block_id: format!("b{}", i),
                    start_minute: 600 + (i % 5) as u32 * 60,
                    duration_minutes: 30,
                    title: "sync".into(),
                }),
                _ => EventKind::MomentumAdjusted(MomentumAdjusted { delta: -3 }),
            };
            Event {
                id: EventId::new(),
                seq: i as u64 + 1,
                timestamp,
                day: timestamp.date_naive(),
                idempotency_key: format!("k{}", i),
                kind,
            }
        })
        .collect()
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    for size in [100, 1_000, 10_000, 100_000] {
        let log = build_log(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &log, |b, log| {
            b.iter(|| black_box(replay(day(), log)));
        });
    }
    group.finish();
}

fn bench_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_policies");
    let registry = PolicyRegistry::new();
    register_builtins(&registry, &Default::default());
    let now = Utc.with_ymd_and_hms(2026, 3, 10, 19, 0, 0).unwrap();

    for size in [100, 1_000, 10_000] {
        let log = build_log(size);
        let state = replay(day(), &log);
        let ctx = PolicyContext::build(state, log, now, 0);
        group.bench_with_input(BenchmarkId::from_parameter(size), &ctx, |b, ctx| {
            b.iter(|| {
                let cooldowns = CooldownTable::new();
                black_box(run_policies(&registry, ctx, &cooldowns, now))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_replay, bench_policies);
criterion_main!(benches);
