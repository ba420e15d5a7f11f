//! A repeating timer that never runs its callback concurrently.
//!
//! Ticks fire on a fixed-rate grid. A tick that arrives while the callback is still
//! pending is counted, and the backlog is drained back-to-back once the callback returns.
//! Everything runs on an injected [`Scheduler`], so the same timer works on a dedicated
//! thread, inside tokio, or on a virtual clock in tests.

pub mod common;
pub mod config;
pub mod scheduler;
pub mod timer;

pub use common::data_types::{Interval, Phase, TimerStats};
pub use scheduler::{Job, ManualScheduler, Scheduler, ThreadScheduler, TokioDriver, TokioScheduler};
pub use timer::RepeatingGuardedTimer;
