use crate::common::data_types::Interval;
use crate::config::MetricsConfig;
use chrono::Local;
use log::{info, warn};
use rolling_stats::Stats;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time;

/// Records how evenly a timer callback is being invoked.
#[derive(Clone)]
pub struct CadenceMetrics {
    state: Arc<Mutex<CadenceState>>,
    expected: Duration,
    late_tolerance: Duration,
    log_to_file: bool,
    log_file: String,
}

struct CadenceState {
    last_start: Option<Instant>,
    gaps_ms: Stats<f64>,
    durations_ms: Stats<f64>,
    invocations: usize,
    late: usize,
    catch_up: usize,
}

impl Default for CadenceState {
    // min/max must start at the extremes, not 0
    fn default() -> Self {
        Self {
            last_start: None,
            gaps_ms: Stats::new(),
            durations_ms: Stats::new(),
            invocations: 0,
            late: 0,
            catch_up: 0,
        }
    }
}

/// Summary of the invocations recorded since the last reset.
#[derive(Debug, Clone, PartialEq)]
pub struct CadenceReport {
    pub invocations: usize,
    pub avg_gap_ms: f64,
    pub min_gap_ms: f64,
    pub max_gap_ms: f64,
    pub jitter_ms: f64, // Standard deviation of the gaps
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
    pub late: usize,     // Started more than the tolerance after the expected gap
    pub catch_up: usize, // Started less than half an interval after the previous one
}

impl CadenceMetrics {
    pub fn new(interval: Interval, config: &MetricsConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CadenceState::default())),
            expected: interval.as_duration(),
            late_tolerance: Duration::from_millis(config.late_tolerance_ms),
            log_to_file: config.log_to_file,
            log_file: config.log_file.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, CadenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wraps `callback` so every invocation is timed and recorded.
    pub fn instrument<F>(&self, mut callback: F) -> impl FnMut() + Send + 'static
    where
        F: FnMut() + Send + 'static,
    {
        let metrics = self.clone();
        move || {
            let started_at = Instant::now();
            callback();
            metrics.record(started_at, started_at.elapsed());
        }
    }

    pub fn record(&self, started_at: Instant, ran_for: Duration) {
        let mut state = self.state();

        if let Some(previous) = state.last_start {
            let gap = started_at.saturating_duration_since(previous);
            state.gaps_ms.update(gap.as_secs_f64() * 1000.0);

            if gap > self.expected + self.late_tolerance {
                state.late += 1;
            } else if gap < self.expected / 2 {
                state.catch_up += 1;
            }
        }

        state.last_start = Some(started_at);
        state.durations_ms.update(ran_for.as_secs_f64() * 1000.0);
        state.invocations += 1;
    }

    pub fn generate_report(&self) -> CadenceReport {
        let state = self.state();
        let has_gaps = state.gaps_ms.count > 0;
        let has_runs = state.durations_ms.count > 0;

        CadenceReport {
            invocations: state.invocations,
            avg_gap_ms: if has_gaps { state.gaps_ms.mean } else { 0.0 },
            min_gap_ms: if has_gaps { state.gaps_ms.min } else { 0.0 },
            max_gap_ms: if has_gaps { state.gaps_ms.max } else { 0.0 },
            jitter_ms: if has_gaps { state.gaps_ms.std_dev } else { 0.0 },
            avg_duration_ms: if has_runs { state.durations_ms.mean } else { 0.0 },
            max_duration_ms: if has_runs { state.durations_ms.max } else { 0.0 },
            late: state.late,
            catch_up: state.catch_up,
        }
    }

    /// Clears counters but keeps the last start, so the next gap is still measured.
    pub fn reset(&self) {
        let mut state = self.state();
        let last_start = state.last_start;
        *state = CadenceState {
            last_start,
            ..CadenceState::default()
        };
    }

    pub fn log_report(&self, report: &CadenceReport) {
        let line = format!(
            "{:<8} | {:<12.3} | {:<12.3} | {:<12.3} | {:<10.3} | {:<12.3} | {:<12.3} | {:<6} | {:<8}",
            report.invocations,
            report.avg_gap_ms,
            report.min_gap_ms,
            report.max_gap_ms,
            report.jitter_ms,
            report.avg_duration_ms,
            report.max_duration_ms,
            report.late,
            report.catch_up
        );
        let header = format!(
            "{:<8} | {:<12} | {:<12} | {:<12} | {:<10} | {:<12} | {:<12} | {:<6} | {:<8}",
            "Runs", "Avg gap(ms)", "Min gap(ms)", "Max gap(ms)", "Jitter(ms)", "Avg run(ms)",
            "Max run(ms)", "Late", "Catch-up"
        );

        info!("cadence report (expected gap {:?})", self.expected);
        info!("{}", header);
        info!("{}", line);

        if !self.log_to_file {
            return;
        }

        let mut file = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
        {
            Ok(file) => file,
            Err(e) => {
                warn!("failed to open cadence log {}: {}", self.log_file, e);
                return;
            }
        };

        let entry = format!(
            "Time: {}\n{}\n{:-<110}\n{}\n\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            header,
            "",
            line
        );
        if let Err(e) = file.write_all(entry.as_bytes()) {
            warn!("failed to write cadence log {}: {}", self.log_file, e);
        }
    }
}

/// Logs a cadence report every `every`, forever.
pub async fn run_cadence_reporter(metrics: CadenceMetrics, every: Duration) {
    let mut ticker = time::interval(every);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let report = metrics.generate_report();
        metrics.log_report(&report);
        metrics.reset();
    }
}
