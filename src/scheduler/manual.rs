use super::{Job, JobQueue, Scheduler};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A scheduler driven by a virtual clock.
///
/// Nothing runs until the owner calls [`advance`](Self::advance) or
/// [`run_until_idle`](Self::run_until_idle); jobs then run on the calling thread in deadline
/// order. A job can call [`busy_for`](Self::busy_for) to pretend it took a while, which is how
/// tests model slow callbacks.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    queue: JobQueue,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the clock forward by `by`, running every job due up to `now + by`.
    ///
    /// The clock jumps to each job's deadline before running it. Jobs that spend time through
    /// `busy_for` can push the clock past the target; anything that falls due beyond the
    /// target stays queued for the next call.
    pub fn advance(&self, by: Duration) {
        let target = self.now() + by;
        loop {
            let job = {
                let mut state = self.state();
                match state.queue.pop_due(target) {
                    Some((deadline, job)) => {
                        if deadline > state.now {
                            state.now = deadline;
                        }
                        job
                    }
                    None => {
                        state.now = state.now.max(target);
                        return;
                    }
                }
            };
            job();
        }
    }

    /// Runs every job that is already due without moving the clock.
    pub fn run_until_idle(&self) {
        self.advance(Duration::ZERO);
    }

    /// Advances the clock without running anything, as if the current job were busy.
    pub fn busy_for(&self, duration: Duration) {
        self.state().now += duration;
    }

    /// Number of jobs waiting to run.
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Duration {
        self.state().now
    }

    fn run_at(&self, deadline: Duration, job: Job) {
        self.state().queue.push(deadline, job);
    }

    fn run_soon(&self, job: Job) {
        let mut state = self.state();
        let now = state.now;
        state.queue.push(now, job);
    }
}
