// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time handling: stopwatches for wall-clock reporting and the run deadline.

mod deadline;
mod stopwatch;

pub use deadline::*;
pub use stopwatch::*;

/// Converts a wall-clock time to the f64 epoch-millisecond representation
/// used on the wire.
pub fn epoch_millis(time: chrono::DateTime<chrono::Local>) -> f64 {
    time.timestamp_millis() as f64
}
