//! The repeating guarded timer.
//!
//! Two kinds of job drive the timer, both submitted to its scheduler:
//!
//! * a *tick* fires every interval on a fixed-rate grid, re-arms itself and bumps the
//!   pending count;
//! * a *drain* runs the callback once and decrements the pending count, re-queueing itself
//!   while anything is left.
//!
//! Only the tick that moves the timer from [`Phase::AwaitingTick`] to [`Phase::Draining`]
//! queues a drain, so there is never more than one drain chain and the callback never
//! overlaps itself. Every step goes through the scheduler rather than calling the next step
//! directly, which keeps the stack flat no matter how long the backlog gets.

use crate::common::data_types::{Interval, Phase, TimerStats};
use crate::scheduler::Scheduler;
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Callback = Box<dyn FnMut() + Send + 'static>;

pub struct RepeatingGuardedTimer<S: Scheduler> {
    shared: Arc<Shared<S>>,
}

struct Shared<S> {
    scheduler: S,
    callback: Mutex<Callback>,
    state: Mutex<TimerStats>,
}

impl<S: Scheduler> RepeatingGuardedTimer<S> {
    pub fn new<F>(scheduler: S, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                scheduler,
                callback: Mutex::new(Box::new(callback)),
                state: Mutex::new(TimerStats::default()),
            }),
        }
    }

    /// Starts ticking every `interval`, with the first tick right away.
    ///
    /// There is no way to stop the timer. Calling `start` again adds an independent tick
    /// chain on its own grid; all chains share the pending count, so the callback still never
    /// overlaps, but it runs once per tick of every chain.
    pub fn start(&self, interval: Interval) {
        let chain = {
            let mut state = self.shared.state();
            state.chains += 1;
            state.chains
        };
        if chain > 1 {
            warn!(
                "timer started again, now running {} tick chains on one callback",
                chain
            );
        } else {
            info!("timer started with interval {}", interval);
        }

        let shared = Arc::clone(&self.shared);
        let due = self.shared.scheduler.now();
        self.shared
            .scheduler
            .run_soon(Box::new(move || tick(shared, interval, due)));
    }

    pub fn stats(&self) -> TimerStats {
        *self.shared.state()
    }

    pub fn pending_count(&self) -> u64 {
        self.shared.state().pending
    }

    pub fn phase(&self) -> Phase {
        self.shared.state().phase
    }

    pub fn scheduler(&self) -> &S {
        &self.shared.scheduler
    }
}

impl<S> Shared<S> {
    fn state(&self) -> MutexGuard<'_, TimerStats> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Returns false if the callback panicked
    fn invoke_callback(&self) -> bool {
        let mut guard = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        let callback = &mut *guard;
        panic::catch_unwind(AssertUnwindSafe(|| callback())).is_ok()
    }
}

fn tick<S: Scheduler>(shared: Arc<Shared<S>>, interval: Interval, due: Duration) {
    let next_due = due + interval.as_duration();
    let rearm = Arc::clone(&shared);
    shared
        .scheduler
        .run_at(next_due, Box::new(move || tick(rearm, interval, next_due)));

    let start_drain = {
        let mut state = shared.state();
        state.ticks += 1;
        state.pending += 1;
        state.max_pending = state.max_pending.max(state.pending);
        if state.pending > 1 {
            debug!(
                "tick {} arrived with callback still pending, backlog is {}",
                state.ticks, state.pending
            );
        }
        if state.phase == Phase::AwaitingTick {
            state.phase = Phase::Draining;
            true
        } else {
            false
        }
    };

    if start_drain {
        schedule_drain(shared);
    }
}

fn drain<S: Scheduler>(shared: Arc<Shared<S>>) {
    let succeeded = shared.invoke_callback();

    let more = {
        let mut state = shared.state();
        debug_assert!(state.pending > 0, "drain ran with nothing pending");
        state.pending = state.pending.saturating_sub(1);
        state.completed += 1;
        if !succeeded {
            state.panicked += 1;
            error!(
                "timer callback panicked, continuing with {} pending",
                state.pending
            );
        }
        if state.pending > 0 {
            true
        } else {
            state.phase = Phase::AwaitingTick;
            false
        }
    };

    if more {
        schedule_drain(shared);
    }
}

fn schedule_drain<S: Scheduler>(shared: Arc<Shared<S>>) {
    let next = Arc::clone(&shared);
    shared.scheduler.run_soon(Box::new(move || drain(next)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn one_second() -> Interval {
        Interval::new(secs(1)).unwrap()
    }

    #[test]
    fn nothing_runs_before_the_scheduler_turns() {
        let scheduler = ManualScheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let timer = RepeatingGuardedTimer::new(scheduler.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.start(one_second());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(timer.phase(), Phase::AwaitingTick);

        scheduler.run_until_idle();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(timer.pending_count(), 0);
        assert_eq!(timer.phase(), Phase::AwaitingTick);
    }

    #[test]
    fn panicking_callback_does_not_wedge_the_counter() {
        let scheduler = ManualScheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let timer = RepeatingGuardedTimer::new(scheduler.clone(), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first run fails");
            }
        });

        timer.start(one_second());
        scheduler.advance(secs(2));

        let stats = timer.stats();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn only_one_drain_chain_is_ever_queued() {
        let scheduler = ManualScheduler::new();
        let probe = scheduler.clone();
        let queued_during_callback = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&queued_during_callback);
        let timer = RepeatingGuardedTimer::new(scheduler.clone(), move || {
            let mut seen = seen.lock().unwrap();
            if seen.is_empty() {
                probe.busy_for(secs(10));
            }
            seen.push(probe.queued());
        });

        timer.start(one_second());
        scheduler.advance(secs(10));

        // While a callback runs, the only queued job is the next tick of the grid
        let seen = queued_during_callback.lock().unwrap();
        assert_eq!(seen.len(), 11);
        assert!(seen.iter().all(|&queued| queued == 1), "{:?}", seen);
        assert_eq!(timer.stats().max_pending, 9);
        assert_eq!(timer.pending_count(), 0);
    }
}
