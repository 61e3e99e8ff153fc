// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatcher seam.
//!
//! A [`Dispatcher`] owns the worker pool for one phase's test groups. The
//! runner treats it as opaque: it hands over groups and extra environment,
//! awaits completion, and afterwards asks for worker errors and produced
//! environment. Worker scheduling, process reuse and retry mechanics live
//! behind this trait.

use crate::projects::ProjectIndex;
use crate::report::{ReportTree, TestIndex};
use crate::reporter::Reporter;
use futures::future::BoxFuture;
use indexmap::IndexMap;

/// Environment variables threaded between projects, in insertion order.
pub type EnvMap = IndexMap<String, String>;

/// A set of tests a single worker runs together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestGroup {
    /// The project the tests belong to.
    pub project: ProjectIndex,
    /// Tests of the group, in declaration order.
    pub tests: Vec<TestIndex>,
}

/// Mutable run state a dispatcher reports through.
pub struct DispatchContext<'a> {
    /// The live report tree.
    pub tree: &'a mut ReportTree,
    /// The reporter to drive as tests execute.
    pub reporter: &'a mut dyn Reporter,
}

/// Executes test groups on a pool of isolated workers.
pub trait Dispatcher: Send {
    /// Runs the given groups to completion, reporting through `cx`.
    ///
    /// `extra_env` is injected into every worker; it carries environment
    /// produced by dependency and setup projects of earlier phases.
    fn run<'a>(
        &'a mut self,
        cx: &'a mut DispatchContext<'_>,
        groups: &'a [TestGroup],
        extra_env: &'a EnvMap,
    ) -> BoxFuture<'a, ()>;

    /// Shuts the worker pool down. Idempotent.
    fn stop(&mut self) -> BoxFuture<'_, ()>;

    /// Whether any worker broke (crashed, leaked, failed to start) during
    /// [`run`](Dispatcher::run). A broken worker poisons the whole phase.
    fn has_worker_errors(&self) -> bool;

    /// Environment variables produced by the executed projects, to be
    /// threaded into dependents and teardown projects.
    fn produced_env(&self) -> EnvMap;
}
