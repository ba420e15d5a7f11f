use super::{Job, JobQueue, Scheduler};
use log::debug;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task;
use tokio::time::{sleep_until, Instant};

/// Scheduler handle backed by the tokio runtime.
///
/// Handles only stamp jobs with a deadline and send them to the paired [`TokioDriver`],
/// so they can be used from any thread, inside a runtime or not. The driver keeps the
/// deadline-ordered queue and runs jobs one at a time.
#[derive(Clone)]
pub struct TokioScheduler {
    sender: mpsc::UnboundedSender<(Duration, Job)>,
    epoch: Instant,
}

/// Executes the jobs of a [`TokioScheduler`].
///
/// Jobs run synchronously inside the driver task. On a multi-thread runtime each job runs
/// under `block_in_place`, so a callback that blocks does not starve other tasks. A
/// current-thread runtime has no spare worker: there, a blocking callback stalls every
/// task on the runtime, timed jobs included, until it returns.
pub struct TokioDriver {
    receiver: mpsc::UnboundedReceiver<(Duration, Job)>,
    epoch: Instant,
}

impl TokioScheduler {
    pub fn new() -> (Self, TokioDriver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let epoch = Instant::now();
        (Self { sender, epoch }, TokioDriver { receiver, epoch })
    }

    fn submit(&self, deadline: Duration, job: Job) {
        if self.sender.send((deadline, job)).is_err() {
            debug!("tokio driver stopped, dropping job");
        }
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn run_at(&self, deadline: Duration, job: Job) {
        self.submit(deadline, job);
    }

    fn run_soon(&self, job: Job) {
        self.submit(self.now(), job);
    }
}

impl TokioDriver {
    /// Executes jobs until every scheduler handle is gone and the queue is empty.
    pub async fn run(mut self) {
        let mut queue = JobQueue::default();
        let mut connected = true;

        loop {
            // Pull in everything submitted so far before picking the next job
            while let Ok((deadline, job)) = self.receiver.try_recv() {
                queue.push(deadline, job);
            }

            if let Some((_, job)) = queue.pop_due(self.epoch.elapsed()) {
                run_job(job);
                continue;
            }

            match (queue.next_deadline(), connected) {
                (None, false) => break,
                (Some(deadline), false) => sleep_until(self.epoch + deadline).await,
                (None, true) => match self.receiver.recv().await {
                    Some((deadline, job)) => queue.push(deadline, job),
                    None => connected = false,
                },
                (Some(deadline), true) => {
                    tokio::select! {
                        received = self.receiver.recv() => match received {
                            Some((deadline, job)) => queue.push(deadline, job),
                            None => connected = false,
                        },
                        _ = sleep_until(self.epoch + deadline) => {}
                    }
                }
            }
        }

        debug!("tokio driver stopping, no handles left");
    }
}

fn run_job(job: Job) {
    match Handle::current().runtime_flavor() {
        RuntimeFlavor::CurrentThread => job(),
        _ => task::block_in_place(job),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn timed_jobs_run_after_their_delay() {
        let (scheduler, driver) = TokioScheduler::new();
        tokio::spawn(driver.run());

        let seen = Arc::new(Mutex::new(Vec::new()));
        for (delay, name) in [(300, "slow"), (100, "fast")] {
            let seen = Arc::clone(&seen);
            let clock = scheduler.clone();
            scheduler.run_after(
                Duration::from_millis(delay),
                Box::new(move || seen.lock().unwrap().push((name, clock.now()))),
            );
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "fast");
        assert_eq!(seen[1].0, "slow");
        assert!(seen[1].1 >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_deadline_runs_before_a_later_soon_job() {
        let (scheduler, driver) = TokioScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        scheduler.run_at(
            Duration::ZERO,
            Box::new(move || log.lock().unwrap().push("overdue")),
        );
        tokio::time::advance(Duration::from_millis(5)).await;
        let log = Arc::clone(&order);
        scheduler.run_soon(Box::new(move || log.lock().unwrap().push("soon")));

        tokio::spawn(driver.run());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*order.lock().unwrap(), vec!["overdue", "soon"]);
    }

    #[tokio::test(start_paused = true)]
    async fn equal_deadlines_keep_submission_order() {
        let (scheduler, driver) = TokioScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = Arc::clone(&order);
            scheduler.run_at(
                Duration::from_millis(50),
                Box::new(move || log.lock().unwrap().push(name)),
            );
        }

        tokio::spawn(driver.run());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn handles_work_outside_a_runtime() {
        let (scheduler, driver) = TokioScheduler::new();
        let hits = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&hits);
        scheduler.run_after(
            Duration::from_millis(10),
            Box::new(move || *counter.lock().unwrap() += 1),
        );
        drop(scheduler);

        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(driver.run());

        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
