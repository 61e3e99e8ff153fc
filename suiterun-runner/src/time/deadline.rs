// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;
use tokio::time::Instant;

/// The run-wide deadline, computed once from the monotonic clock at run
/// start.
///
/// The same `Deadline` value is handed to both the main task pass and the
/// teardown pass, so teardown cannot run unbounded after a parent timeout.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Creates a deadline `timeout` from now. A zero timeout means the run
    /// is unbounded.
    pub fn from_timeout(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Self::unbounded()
        } else {
            Self {
                at: Some(Instant::now() + timeout),
            }
        }
    }

    /// Creates an unbounded deadline that never fires.
    pub fn unbounded() -> Self {
        Self { at: None }
    }

    /// Returns true if no deadline is set.
    pub fn is_unbounded(&self) -> bool {
        self.at.is_none()
    }

    /// Returns true if the deadline has already passed.
    pub fn has_expired(&self) -> bool {
        match self.at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Resolves when the deadline fires; pends forever when unbounded.
    pub async fn expired(&self) {
        match self.at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}
