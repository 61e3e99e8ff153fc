// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for suiterun: a phased, dependency-aware test suite
//! orchestrator with event-sourced reporting.
//!
//! The flow of a run:
//!
//! 1. A discovery collaborator produces resolved [`projects`](crate::projects)
//!    and the listed suite tree ([`report::ReportTree`]).
//! 2. The [`phases`] planner partitions projects into phases that honor
//!    declared dependencies and teardown-follows-setups ordering.
//! 3. The [`orchestrator`] executes the run's named tasks in order, racing
//!    them against interrupt signals and the global deadline, and unwinds
//!    registered teardowns in reverse start order.
//! 4. Per phase, an opaque [`dispatch::Dispatcher`] executes test groups,
//!    driving [`reporter::Reporter`]s; the [`emitter::EventEmitter`] mirrors
//!    the same lifecycle onto the wire as protocol events.
//! 5. In sharded mode, per-shard event logs are recombined by [`merge`] and
//!    replayed through the [`receiver::EventReceiver`].

pub mod dispatch;
pub mod emitter;
pub mod errors;
mod helpers;
pub mod merge;
pub mod orchestrator;
pub mod phases;
pub mod projects;
pub mod receiver;
pub mod report;
pub mod reporter;
pub mod signal;
pub mod tasks;
pub mod time;
