// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long a run (or one attempt) takes.
//!
//! Start times are reported from the realtime clock, durations from the
//! monotonic clock, so a snapshot stays meaningful even if the system clock
//! steps during the run.

use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::time::Instant;

/// Starts a new stopwatch.
pub fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            // These two reads happen imperceptibly close to each other, which
            // is good enough for our purposes.
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    /// The wall-clock time the stopwatch was started at.
    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    /// Captures the elapsed time so far.
    pub fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            duration: self.instant.elapsed(),
        }
    }
}

/// A snapshot of elapsed time taken from a [`StopwatchStart`].
#[derive(Clone, Debug)]
pub struct StopwatchSnapshot {
    /// The wall-clock start time.
    pub start_time: DateTime<Local>,
    /// Elapsed time per the monotonic clock.
    pub duration: Duration,
}
