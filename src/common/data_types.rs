use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A strictly positive period between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval(Duration);

impl Interval {
    /// Returns `None` for a zero duration.
    pub fn new(period: Duration) -> Option<Self> {
        if period.is_zero() {
            None
        } else {
            Some(Self(period))
        }
    }

    /// Fractional seconds, as read from config files and the command line.
    pub fn from_secs_f64(secs: f64) -> anyhow::Result<Self> {
        if !secs.is_finite() || secs <= 0.0 {
            bail!("interval must be a positive number of seconds, got {}", secs);
        }
        let period = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("interval of {} seconds is out of range", secs))?;
        match Self::new(period) {
            Some(interval) => Ok(interval),
            None => bail!("interval of {} seconds rounds down to zero", secs),
        }
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Where the timer's drain loop currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No tick is pending; the next tick starts a drain.
    #[default]
    AwaitingTick,
    /// A drain job is queued or running; new ticks only bump the pending count.
    Draining,
}

/// Point-in-time snapshot of a timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    pub pending: u64,     // Ticks fired whose callback has not completed
    pub phase: Phase,     // Current drain state
    pub ticks: u64,       // Total ticks fired, across all chains
    pub completed: u64,   // Callback invocations finished (including panicked ones)
    pub max_pending: u64, // Largest backlog observed
    pub chains: u32,      // Number of `start` calls
    pub panicked: u64,    // Callback invocations that panicked
}
