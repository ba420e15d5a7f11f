//! Execution contexts that run timer jobs one at a time.
//!
//! A [`Scheduler`] offers two primitives: run a job once a deadline has passed, and run a
//! job on the next turn of the queue. Implementations never run two jobs at once, and among
//! runnable jobs the earliest deadline goes first, ties broken by submission order.

mod manual;
mod thread;
mod tokio_runtime;

pub use self::manual::ManualScheduler;
pub use self::thread::ThreadScheduler;
pub use self::tokio_runtime::{TokioDriver, TokioScheduler};

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

/// A unit of work handed to a scheduler.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync + 'static {
    /// Monotonic time elapsed since the scheduler was created.
    fn now(&self) -> Duration;

    /// Runs `job` once `now()` has reached `deadline`. A deadline in the past makes the job
    /// runnable immediately, ordered ahead of anything with a later deadline.
    fn run_at(&self, deadline: Duration, job: Job);

    /// Runs `job` on the next turn of the queue.
    fn run_soon(&self, job: Job);

    fn run_after(&self, delay: Duration, job: Job) {
        self.run_at(self.now() + delay, job)
    }
}

struct TimedJob {
    deadline: Duration,
    seq: u64,
    job: Job,
}

impl PartialEq for TimedJob {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimedJob {}

impl PartialOrd for TimedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedJob {
    // Reversed so the max-heap yields the earliest deadline, then the oldest submission
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Deadline-ordered job queue shared by every scheduler.
#[derive(Default)]
pub(crate) struct JobQueue {
    heap: BinaryHeap<TimedJob>,
    next_seq: u64,
}

impl JobQueue {
    pub(crate) fn push(&mut self, deadline: Duration, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimedJob { deadline, seq, job });
    }

    pub(crate) fn next_deadline(&self) -> Option<Duration> {
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Pops the earliest job if its deadline is at or before `limit`.
    pub(crate) fn pop_due(&mut self, limit: Duration) -> Option<(Duration, Job)> {
        if self.next_deadline()? > limit {
            return None;
        }
        self.heap.pop().map(|entry| (entry.deadline, entry.job))
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Job {
        let log = Arc::clone(log);
        Box::new(move || log.lock().unwrap().push(name))
    }

    #[test]
    fn pops_earliest_deadline_then_submission_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = JobQueue::default();
        queue.push(Duration::from_millis(20), recorder(&log, "late"));
        queue.push(Duration::from_millis(10), recorder(&log, "first"));
        queue.push(Duration::from_millis(10), recorder(&log, "second"));

        while let Some((_, job)) = queue.pop_due(Duration::from_millis(20)) {
            job();
        }

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "late"]);
        assert!(queue.next_deadline().is_none());
    }

    #[test]
    fn pop_due_respects_limit() {
        let mut queue = JobQueue::default();
        queue.push(Duration::from_secs(2), Box::new(|| {}));

        assert!(queue.pop_due(Duration::from_secs(1)).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_deadline(), Some(Duration::from_secs(2)));
        assert!(queue.pop_due(Duration::from_secs(2)).is_some());
    }
}
