use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use guarded_timer::{Interval, ManualScheduler, RepeatingGuardedTimer};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn interval() -> Interval {
    Interval::new(Duration::from_millis(10)).unwrap()
}

pub fn benchmark_steady_ticks(c: &mut Criterion) {
    // One callback per tick, never more than one pending
    c.bench_function("steady_1000_ticks", |b| {
        b.iter_batched(
            || {
                let scheduler = ManualScheduler::new();
                let calls = Arc::new(AtomicU64::new(0));
                let counter = Arc::clone(&calls);
                let timer = RepeatingGuardedTimer::new(scheduler.clone(), move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
                timer.start(interval());
                (scheduler, timer, calls)
            },
            |(scheduler, timer, calls)| {
                scheduler.advance(Duration::from_secs(10));
                black_box(calls.load(Ordering::Relaxed));
                black_box(timer.stats());
            },
            BatchSize::SmallInput,
        );
    });
}

pub fn benchmark_backlog_drain(c: &mut Criterion) {
    // The first callback stalls for 1000 intervals, the rest drain back-to-back
    c.bench_function("drain_1000_backlog", |b| {
        b.iter_batched(
            || {
                let scheduler = ManualScheduler::new();
                let busy = scheduler.clone();
                let mut first = true;
                let timer = RepeatingGuardedTimer::new(scheduler.clone(), move || {
                    if first {
                        first = false;
                        busy.busy_for(Duration::from_secs(10));
                    }
                });
                timer.start(interval());
                (scheduler, timer)
            },
            |(scheduler, timer)| {
                scheduler.advance(Duration::from_secs(10));
                black_box(timer.stats());
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, benchmark_steady_ticks, benchmark_backlog_drain);
criterion_main!(benches);
