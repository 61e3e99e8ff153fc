// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! The wire vocabulary spoken between suiterun's execution side and its
//! reporting side.
//!
//! Execution emits a stream of lifecycle [`Event`]s; reporting consumes the
//! stream and reconstructs the suite tree. The same vocabulary is persisted
//! as newline-delimited JSON (one `{method, params}` object per line) when a
//! run is sharded, so everything here must remain stable across versions and
//! portable across machines. In particular:
//!
//! - All file paths on the wire are relative to the emitting run's root
//!   directory, never absolute.
//! - Object ids ([`TestId`], [`ResultId`], [`StepId`], [`ProjectId`],
//!   [`SuiteId`]) are opaque strings minted once and reused across their
//!   begin/end pair. They are unique within one run or shard, never across
//!   shards.
//! - Timestamps and durations are f64 epoch milliseconds.

mod events;
mod ids;

pub use events::*;
pub use ids::*;
