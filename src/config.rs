use crate::common::data_types::Interval;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timer: TimerConfig,
    pub workload: WorkloadConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub interval_secs: f64,           // Period between ticks, fractional seconds allowed
    pub scheduler: SchedulerKind,     // Which execution context drives the timer
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Thread, // Dedicated worker thread
    Tokio,  // Driver task on the tokio runtime
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub callback_work_ms: u64,    // Simulated work done by every callback
    pub jitter_ms: u64,           // Random extra work, up to this many ms
    pub slow_every: Option<u64>,  // Every n-th callback is slow
    pub slow_work_ms: u64,        // How long a slow callback takes
    pub run_for_secs: f64,        // How long the demo runs, 0 means until Ctrl-C
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,           // Whether to record callback cadence
    pub report_interval_ms: u64, // How often to report cadence
    pub late_tolerance_ms: u64,  // Slack before a start counts as late
    pub log_to_file: bool,       // Whether to append reports to a file
    pub log_file: String,        // Path to the report file
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            scheduler: SchedulerKind::Thread,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            callback_work_ms: 0,
            jitter_ms: 0,
            slow_every: None,
            slow_work_ms: 2500,
            run_for_secs: 10.0,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_ms: 5000,
            late_tolerance_ms: 50,
            log_to_file: false,
            log_file: "cadence.log".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write config {}", path.display()))?;
        Ok(())
    }

    pub fn interval(&self) -> anyhow::Result<Interval> {
        Interval::from_secs_f64(self.timer.interval_secs).context("invalid timer.interval_secs")
    }
}

impl FromStr for SchedulerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "thread" => Ok(Self::Thread),
            "tokio" => Ok(Self::Tokio),
            other => anyhow::bail!("unknown scheduler {:?}, expected thread or tokio", other),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread => f.write_str("thread"),
            Self::Tokio => f.write_str("tokio"),
        }
    }
}
