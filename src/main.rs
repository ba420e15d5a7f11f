use anyhow::Context;
use chrono::Local;
use clap::Parser;
use guarded_timer::common::metrics::{run_cadence_reporter, CadenceMetrics};
use guarded_timer::config::{Config, SchedulerKind, WorkloadConfig};
use guarded_timer::{Interval, RepeatingGuardedTimer, Scheduler, ThreadScheduler, TokioScheduler};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Print the current time every interval, never running two callbacks at once.
#[derive(Parser, Debug)]
#[command(name = "guarded-timer", version)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between ticks, fractions allowed
    #[arg(short, long)]
    interval: Option<f64>,

    /// Milliseconds of simulated work per callback
    #[arg(long)]
    work_ms: Option<u64>,

    /// Up to this many extra milliseconds of random work per callback
    #[arg(long)]
    jitter_ms: Option<u64>,

    /// Make every n-th callback slow
    #[arg(long)]
    slow_every: Option<u64>,

    /// Milliseconds a slow callback takes
    #[arg(long)]
    slow_work_ms: Option<u64>,

    /// Execution context: thread or tokio
    #[arg(long)]
    scheduler: Option<SchedulerKind>,

    /// Seconds to run for, 0 runs until Ctrl-C
    #[arg(long)]
    run_for: Option<f64>,

    /// Disable cadence reports
    #[arg(long)]
    no_metrics: bool,

    /// Write the effective config to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(interval) = self.interval {
            config.timer.interval_secs = interval;
        }
        if let Some(scheduler) = self.scheduler {
            config.timer.scheduler = scheduler;
        }
        if let Some(work_ms) = self.work_ms {
            config.workload.callback_work_ms = work_ms;
        }
        if let Some(jitter_ms) = self.jitter_ms {
            config.workload.jitter_ms = jitter_ms;
        }
        if self.slow_every.is_some() {
            config.workload.slow_every = self.slow_every;
        }
        if let Some(slow_work_ms) = self.slow_work_ms {
            config.workload.slow_work_ms = slow_work_ms;
        }
        if let Some(run_for) = self.run_for {
            config.workload.run_for_secs = run_for;
        }
        if self.no_metrics {
            config.metrics.enabled = false;
        }

        Ok(config)
    }
}

// Prints the time, then burns the configured amount of work
fn print_time_callback(workload: &WorkloadConfig) -> impl FnMut() + Send + 'static {
    let workload = workload.clone();
    let mut rng = SmallRng::from_entropy();
    let mut invocation: u64 = 0;

    move || {
        invocation += 1;
        println!("{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"));

        let mut work_ms = workload.callback_work_ms;
        if workload.jitter_ms > 0 {
            work_ms += rng.gen_range(0..=workload.jitter_ms);
        }
        if let Some(every) = workload.slow_every.filter(|&n| n > 0) {
            if invocation % every == 0 {
                work_ms += workload.slow_work_ms;
            }
        }
        if work_ms > 0 {
            thread::sleep(Duration::from_millis(work_ms));
        }
    }
}

async fn run_timer<S: Scheduler>(
    scheduler: S,
    callback: Box<dyn FnMut() + Send>,
    interval: Interval,
    run_for_secs: f64,
) -> anyhow::Result<()> {
    let timer = RepeatingGuardedTimer::new(scheduler, callback);
    timer.start(interval);

    if run_for_secs > 0.0 {
        let run_for = Duration::try_from_secs_f64(run_for_secs).context("invalid run_for_secs")?;
        tokio::time::sleep(run_for).await;
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
    }

    let stats = timer.stats();
    info!(
        "stopping after {} ticks, {} callbacks, {} pending, max backlog {}",
        stats.ticks, stats.completed, stats.pending, stats.max_pending
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    if let Some(path) = &cli.write_config {
        config.save_to_file(path)?;
        info!("wrote config to {}", path.display());
        return Ok(());
    }

    let interval = config.interval()?;
    let callback = print_time_callback(&config.workload);

    let metrics = if config.metrics.enabled {
        Some(CadenceMetrics::new(interval, &config.metrics))
    } else {
        None
    };
    let callback: Box<dyn FnMut() + Send> = match &metrics {
        Some(metrics) => Box::new(metrics.instrument(callback)),
        None => Box::new(callback),
    };
    if let Some(metrics) = &metrics {
        let every = Duration::from_millis(config.metrics.report_interval_ms.max(1));
        tokio::spawn(run_cadence_reporter(metrics.clone(), every));
    }

    info!(
        "running on the {} scheduler, interval {}",
        config.timer.scheduler, interval
    );
    let run_for = config.workload.run_for_secs;
    match config.timer.scheduler {
        SchedulerKind::Thread => {
            run_timer(ThreadScheduler::new()?, callback, interval, run_for).await?;
        }
        SchedulerKind::Tokio => {
            let (scheduler, driver) = TokioScheduler::new();
            tokio::spawn(driver.run());
            run_timer(scheduler, callback, interval, run_for).await?;
        }
    }

    if let Some(metrics) = &metrics {
        metrics.log_report(&metrics.generate_report());
    }
    Ok(())
}
