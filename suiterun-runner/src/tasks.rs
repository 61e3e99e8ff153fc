// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The standard task list of a test run.
//!
//! [`run_tests`] assembles a [`TaskOrchestrator`] over a [`TestRun`]
//! context: clear stale output directories, set plugins up, report the run
//! start, plan phases, then execute them phase by phase through the
//! configured dispatcher factory. Teardowns unwind plugins and worker pools
//! in reverse, and the final result is emitted once the orchestrator
//! returns.

use crate::dispatch::{DispatchContext, Dispatcher, EnvMap, TestGroup};
use crate::emitter::IdMinter;
use crate::errors::RunSetupError;
use crate::orchestrator::{Task, TaskOrchestrator};
use crate::phases::{EdgeKind, PhasePlan, TestGrouper, plan_phases, prerequisites};
use crate::projects::{ProjectGraph, ProjectIndex};
use crate::report::{ReportTree, TestIndex, TransientStatus};
use crate::reporter::Reporter;
use crate::signal::DebouncedInterrupts;
use crate::time::{Deadline, epoch_millis, stopwatch};
use camino::Utf8PathBuf;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use suiterun_protocol::{ErrorDetails, FullResult, ResultId, RunStatus};
use tracing::debug;

/// Run-wide configuration.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// The absolute root directory wire paths are made relative to.
    pub root_dir: Utf8PathBuf,
    /// The tool version reported in `onBegin`.
    pub version: String,
    /// Configured worker count.
    pub workers: usize,
    /// Free-form metadata reported in `onBegin`.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Global timeout for the whole run; zero means unbounded.
    pub global_timeout: Duration,
    /// Project names to run; empty means every project.
    pub project_filter: Vec<String>,
}

impl RunConfig {
    /// Creates a configuration with defaults.
    pub fn new(root_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            workers: 1,
            metadata: serde_json::Map::new(),
            global_timeout: Duration::ZERO,
            project_filter: Vec::new(),
        }
    }

    /// The run deadline implied by the global timeout.
    pub fn deadline(&self) -> Deadline {
        Deadline::from_timeout(self.global_timeout)
    }
}

/// Creates one dispatcher per phase bucket.
pub trait DispatcherFactory: Send {
    /// Creates a dispatcher sized for `workers` concurrent groups.
    fn create(&mut self, workers: usize) -> Box<dyn Dispatcher>;
}

/// A run-scoped extension with lifecycle hooks.
///
/// Plugins are set up before any phase runs; their teardowns are registered
/// with the orchestrator and unwind in reverse even when the run fails.
pub trait Plugin: Send {
    /// The plugin name, for diagnostics.
    fn name(&self) -> &str;

    /// Called before any phase runs.
    fn setup<'a>(&'a mut self, config: &'a RunConfig) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        let _ = config;
        Box::pin(async { Ok(()) })
    }

    /// Called once the full listed tree has been reported.
    fn begin(&mut self, tree: &ReportTree) {
        let _ = tree;
    }

    /// Called with the final result, before `onExit`.
    fn end(&mut self, result: &FullResult) {
        let _ = result;
    }

    /// Called during the teardown pass.
    fn teardown<'a>(&'a mut self) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        Box::pin(async { Ok(()) })
    }
}

/// The mutable context every run task operates on.
pub struct TestRun {
    /// Run-wide configuration.
    pub config: RunConfig,
    /// The resolved project graph.
    pub graph: ProjectGraph,
    /// The listed suite tree, updated in place as tests execute.
    pub tree: ReportTree,
    /// The project closure for this run, in traversal order.
    pub closure: Vec<ProjectIndex>,
    /// The phase plan, filled in by the planning task.
    pub plan: Option<PhasePlan>,
    factory: Box<dyn DispatcherFactory>,
    grouper: Box<dyn TestGrouper + Send>,
    plugins: Vec<Box<dyn Plugin>>,
    failed_projects: HashSet<ProjectIndex>,
    produced_env: HashMap<ProjectIndex, EnvMap>,
    dispatchers: Vec<Box<dyn Dispatcher>>,
    result_minter: IdMinter,
}

impl TestRun {
    /// Prepares a run: selects projects per the configured filter and pulls
    /// in their dependency closure.
    pub fn new(
        config: RunConfig,
        mut graph: ProjectGraph,
        tree: ReportTree,
        grouper: Box<dyn TestGrouper + Send>,
        factory: Box<dyn DispatcherFactory>,
    ) -> Result<Self, RunSetupError> {
        let top_level = graph.filter_projects(&config.project_filter)?;
        let closure = graph.build_closure(&top_level)?;
        Ok(Self {
            config,
            graph,
            tree,
            closure,
            plan: None,
            factory,
            grouper,
            plugins: Vec::new(),
            failed_projects: HashSet::new(),
            produced_env: HashMap::new(),
            dispatchers: Vec::new(),
            result_minter: IdMinter::new("local"),
        })
    }

    /// Registers a plugin.
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Projects marked failed so far (worker errors or failed tests).
    pub fn failed_projects(&self) -> &HashSet<ProjectIndex> {
        &self.failed_projects
    }

    // The environment a project's workers inherit: the union of what its
    // prerequisites produced, in prerequisite order.
    fn inherited_env(&self, project: ProjectIndex) -> EnvMap {
        let teardown_to_setups = self.graph.teardown_to_setups();
        let mut env = EnvMap::new();
        for edge in prerequisites(&self.graph, &teardown_to_setups, project) {
            if let Some(produced) = self.produced_env.get(&edge.project) {
                for (key, value) in produced {
                    env.insert(key.clone(), value.clone());
                }
            }
        }
        env
    }

    fn synthesize_skip(&mut self, reporter: &mut dyn Reporter, test: TestIndex) {
        let id = self.result_minter.mint("result");
        let node = self.tree.test_mut(test);
        let attempt = node.create_result(ResultId::new(id));
        // Status stays Skipped; the attempt just never dispatches.
        node.results[attempt].transient = TransientStatus::Finished;
        reporter.on_test_begin(&self.tree, test, attempt);
        reporter.on_test_end(&self.tree, test, attempt);
    }
}

/// Runs the whole suite: assembles the standard task list, drives it through
/// the orchestrator, then reports the final result and `onExit`.
///
/// The returned status reflects both task health and test outcomes: a clean
/// task pass still fails the run when any test's outcome is not ok.
pub async fn run_tests(
    run: &mut TestRun,
    interrupts: &mut DebouncedInterrupts,
    reporter: &mut dyn Reporter,
) -> RunStatus {
    let watch = stopwatch();
    let deadline = run.config.deadline();

    let mut orchestrator = TaskOrchestrator::new();
    orchestrator.add_task("clear output", RemoveOutputDirsTask);
    orchestrator.add_task("plugin setup", PluginSetupTask);
    orchestrator.add_task("report begin", ReportBeginTask);
    orchestrator.add_task("create phases", CreatePhasesTask);
    orchestrator.add_task("test suite", RunTestsTask);

    let mut status = orchestrator.run(run, deadline, interrupts, reporter).await;

    if status == RunStatus::Passed {
        let failed = run
            .tree
            .all_tests(run.tree.root())
            .iter()
            .any(|&test| !run.tree.ok(test));
        if failed {
            status = RunStatus::Failed;
        }
    }

    let snapshot = watch.snapshot();
    let result = FullResult {
        status,
        start_time: epoch_millis(snapshot.start_time),
        duration: snapshot.duration.as_secs_f64() * 1000.0,
    };
    for plugin in &mut run.plugins {
        plugin.end(&result);
    }
    reporter.on_end(&run.tree, &result);
    reporter.on_exit();
    status
}

/// Removes the output directories of every project in the closure.
struct RemoveOutputDirsTask;

impl Task<TestRun> for RemoveOutputDirsTask {
    fn setup<'a>(
        &'a mut self,
        cx: &'a mut TestRun,
        _reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        Box::pin(async move {
            // Projects may share an output directory; remove each once.
            let mut dirs = HashSet::new();
            for &project in &cx.closure {
                dirs.insert(cx.graph.node(project).config.output_dir.clone());
            }
            for dir in dirs {
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => debug!(%dir, "removed output directory"),
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                    Err(error) => {
                        return Err(ErrorDetails::from_message(format!(
                            "failed to remove output directory `{dir}`: {error}"
                        )));
                    }
                }
            }
            Ok(())
        })
    }
}

/// Sets plugins up; unwinds them in the teardown pass.
struct PluginSetupTask;

impl Task<TestRun> for PluginSetupTask {
    fn setup<'a>(
        &'a mut self,
        cx: &'a mut TestRun,
        _reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        Box::pin(async move {
            let TestRun {
                plugins, config, ..
            } = cx;
            for plugin in plugins {
                debug!(plugin = plugin.name(), "setting up plugin");
                plugin.setup(config).await?;
            }
            Ok(())
        })
    }

    fn teardown<'a>(
        &'a mut self,
        cx: &'a mut TestRun,
        _reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        Box::pin(async move {
            let mut first_error = None;
            for plugin in cx.plugins.iter_mut().rev() {
                if let Err(error) = plugin.teardown().await {
                    first_error.get_or_insert(error);
                }
            }
            match first_error {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })
    }
}

/// Reports the listed tree to the reporter and plugins.
struct ReportBeginTask;

impl Task<TestRun> for ReportBeginTask {
    fn setup<'a>(
        &'a mut self,
        cx: &'a mut TestRun,
        reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        Box::pin(async move {
            reporter.on_begin(&cx.tree);
            let TestRun { plugins, tree, .. } = cx;
            for plugin in plugins {
                plugin.begin(tree);
            }
            Ok(())
        })
    }
}

/// Partitions the closure into phases.
struct CreatePhasesTask;

impl Task<TestRun> for CreatePhasesTask {
    fn setup<'a>(
        &'a mut self,
        cx: &'a mut TestRun,
        _reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        Box::pin(async move {
            let plan = plan_phases(
                &cx.graph,
                &cx.closure,
                &cx.tree,
                cx.grouper.as_ref(),
                cx.config.workers,
            )
            .map_err(|error| ErrorDetails::from_message(error.to_string()))?;
            cx.plan = Some(plan);
            Ok(())
        })
    }
}

/// Executes the phase plan.
struct RunTestsTask;

impl Task<TestRun> for RunTestsTask {
    fn setup<'a>(
        &'a mut self,
        cx: &'a mut TestRun,
        reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        Box::pin(async move {
            let Some(plan) = cx.plan.take() else {
                return Err(ErrorDetails::from_message(
                    "phase plan missing; planning task did not run",
                ));
            };
            let teardown_to_setups = cx.graph.teardown_to_setups();

            for (phase_index, phase) in plan.phases.into_iter().enumerate() {
                // Projects whose declared dependencies failed never dispatch;
                // their tests each get exactly one synthesized skipped
                // result. Teardown ordering edges do not cascade: a teardown
                // still runs after its setup failed, so cleanup happens.
                let mut runnable: Vec<(ProjectIndex, Vec<TestGroup>)> = Vec::new();
                for entry in phase.projects {
                    let dep_failed = prerequisites(&cx.graph, &teardown_to_setups, entry.project)
                        .iter()
                        .any(|edge| {
                            edge.kind == EdgeKind::Declared
                                && cx.failed_projects.contains(&edge.project)
                        });
                    if dep_failed {
                        debug!(
                            phase = phase_index,
                            project = %cx.graph.node(entry.project).config.name,
                            "skipping project with failed prerequisites"
                        );
                        cx.failed_projects.insert(entry.project);
                        for group in &entry.groups {
                            for &test in &group.tests {
                                cx.synthesize_skip(reporter, test);
                            }
                        }
                    } else {
                        runnable.push((entry.project, entry.groups));
                    }
                }

                // Projects sharing an inherited environment share a
                // dispatcher call; env produced upstream never leaks to
                // projects that didn't ask for it.
                let mut buckets: Vec<(EnvMap, Vec<ProjectIndex>, Vec<TestGroup>)> = Vec::new();
                for (project, groups) in runnable {
                    let env = cx.inherited_env(project);
                    match buckets.iter_mut().find(|(e, _, _)| *e == env) {
                        Some((_, projects, all_groups)) => {
                            projects.push(project);
                            all_groups.extend(groups);
                        }
                        None => buckets.push((env, vec![project], groups)),
                    }
                }

                let mut phase_poisoned = false;
                let mut phase_projects: Vec<ProjectIndex> = Vec::new();
                for (env, projects, groups) in buckets {
                    let mut dispatcher = cx.factory.create(plan.actual_workers);
                    {
                        let mut dcx = DispatchContext {
                            tree: &mut cx.tree,
                            reporter: &mut *reporter,
                        };
                        dispatcher.run(&mut dcx, &groups, &env).await;
                    }
                    if dispatcher.has_worker_errors() {
                        phase_poisoned = true;
                    }
                    let produced = dispatcher.produced_env();
                    for &project in &projects {
                        cx.produced_env.insert(project, produced.clone());
                    }
                    for group in &groups {
                        let project_ok = group.tests.iter().all(|&test| cx.tree.ok(test));
                        if !project_ok {
                            cx.failed_projects.insert(group.project);
                        }
                    }
                    phase_projects.extend(projects);
                    cx.dispatchers.push(dispatcher);
                }
                if phase_poisoned {
                    // A broken worker taints every project of the phase.
                    cx.failed_projects.extend(phase_projects);
                }
            }
            Ok(())
        })
    }

    fn teardown<'a>(
        &'a mut self,
        cx: &'a mut TestRun,
        _reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        Box::pin(async move {
            for dispatcher in cx.dispatchers.iter_mut().rev() {
                dispatcher.stop().await;
            }
            Ok(())
        })
    }
}
