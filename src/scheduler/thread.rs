use super::{Job, JobQueue, Scheduler};
use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::debug;
use std::thread;
use std::time::{Duration, Instant};

enum ThreadCommand {
    At(Duration, Job),
    Soon(Job),
}

/// Runs jobs on one dedicated worker thread.
///
/// Handles are cheap to clone and all feed the same worker. The worker exits once every
/// handle is dropped and its queue is empty; a running timer keeps a handle inside its own
/// jobs, so in practice the worker lives until the process exits.
#[derive(Clone)]
pub struct ThreadScheduler {
    sender: Sender<ThreadCommand>,
    epoch: Instant,
}

impl ThreadScheduler {
    pub fn new() -> anyhow::Result<Self> {
        let (sender, receiver) = unbounded::<ThreadCommand>();
        let epoch = Instant::now();

        thread::Builder::new()
            .name("guarded-timer".to_string())
            .spawn(move || run_worker(receiver, epoch))
            .context("failed to spawn scheduler thread")?;

        Ok(Self { sender, epoch })
    }

    fn submit(&self, command: ThreadCommand) {
        if self.sender.send(command).is_err() {
            // Only possible if the worker panicked; the job is dropped with the message
            debug!("scheduler thread is gone, dropping job");
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn run_at(&self, deadline: Duration, job: Job) {
        self.submit(ThreadCommand::At(deadline, job));
    }

    fn run_soon(&self, job: Job) {
        self.submit(ThreadCommand::Soon(job));
    }
}

fn run_worker(receiver: Receiver<ThreadCommand>, epoch: Instant) {
    let mut queue = JobQueue::default();
    let mut connected = true;

    loop {
        // Pull in everything submitted so far before picking the next job
        while let Ok(command) = receiver.try_recv() {
            enqueue(&mut queue, command, epoch);
        }

        let now = epoch.elapsed();
        if let Some((_, job)) = queue.pop_due(now) {
            job();
            continue;
        }

        let wait = queue.next_deadline().map(|deadline| deadline - now);
        match (wait, connected) {
            (None, false) => break,
            (Some(wait), false) => thread::sleep(wait),
            (None, true) => match receiver.recv() {
                Ok(command) => enqueue(&mut queue, command, epoch),
                Err(_) => connected = false,
            },
            (Some(wait), true) => match receiver.recv_timeout(wait) {
                Ok(command) => enqueue(&mut queue, command, epoch),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => connected = false,
            },
        }
    }

    debug!("scheduler thread stopping, no handles left");
}

fn enqueue(queue: &mut JobQueue, command: ThreadCommand, epoch: Instant) {
    match command {
        ThreadCommand::At(deadline, job) => queue.push(deadline, job),
        ThreadCommand::Soon(job) => queue.push(epoch.elapsed(), job),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_jobs_in_deadline_order() {
        let scheduler = ThreadScheduler::new().unwrap();
        let (tx, rx) = unbounded();

        for (delay_ms, name) in [(60, "third"), (20, "first"), (40, "second")] {
            let tx = tx.clone();
            scheduler.run_after(
                Duration::from_millis(delay_ms),
                Box::new(move || tx.send(name).unwrap()),
            );
        }

        let received: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(received, vec!["first", "second", "third"]);
    }

    #[test]
    fn run_soon_executes_on_worker_thread() {
        let scheduler = ThreadScheduler::new().unwrap();
        let (tx, rx) = unbounded();

        scheduler.run_soon(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("guarded-timer"));
    }
}
